//! A minimal GitHub REST API served by axum on an ephemeral port.

use std::net::SocketAddr;

use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

/// Repository `acme/widgets` with:
///
/// ```text
/// README.md
/// package-lock.json
/// assets/logo.png      (binary)
/// assets/dump.sql      (too large to inline, encoding "none")
/// src/lib.rs
/// src/nested/deep.rs
/// vendor/tool -> symlink
/// ```
///
/// Commits exist on `main` and on `release/1.0+hotfix`. `acme/empty` has
/// no commits, so its root listing is 404 like GitHub's. `acme/limited`
/// always answers 403 with an exhausted rate limit, and any other
/// repository is 404. Requests authenticated with anything other than
/// `Bearer test-token` get 401, unauthenticated requests are allowed.
pub async fn spawn() -> SocketAddr {
    let app = Router::new()
        .route("/repos/{owner}/{repo}", get(repo_info))
        .route("/repos/{owner}/{repo}/branches", get(branches))
        .route("/repos/{owner}/{repo}/commits", get(commits))
        .route("/repos/{owner}/{repo}/commits/{sha}", get(commit_diff))
        .route("/repos/{owner}/{repo}/contents/", get(root_contents))
        .route("/repos/{owner}/{repo}/contents/{*path}", get(contents));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn guard(owner: &str, repo: &str, headers: &HeaderMap) -> Option<Response> {
    if let Some(auth) = headers.get("authorization") {
        if auth.to_str().unwrap_or_default() != "Bearer test-token" {
            return Some(
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"message": "Bad credentials"})),
                )
                    .into_response(),
            );
        }
    }
    match (owner, repo) {
        ("acme", "widgets") | ("acme", "empty") => None,
        ("acme", "limited") => Some(
            (
                StatusCode::FORBIDDEN,
                [("x-ratelimit-remaining", "0")],
                Json(json!({"message": "API rate limit exceeded"})),
            )
                .into_response(),
        ),
        _ => Some(not_found("Not Found")),
    }
}

fn file(path: &str, content: &str) -> serde_json::Value {
    let encoded = base64::engine::general_purpose::STANDARD.encode(content);
    // GitHub wraps base64 content at 60 columns.
    let wrapped: Vec<String> = encoded
        .as_bytes()
        .chunks(60)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect();
    json!({
        "path": path,
        "type": "file",
        "encoding": "base64",
        "content": wrapped.join("\n"),
    })
}

fn binary_file(path: &str, bytes: &[u8]) -> serde_json::Value {
    json!({
        "path": path,
        "type": "file",
        "encoding": "base64",
        "content": base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": message }))).into_response()
}

fn entry(path: &str, kind: &str) -> serde_json::Value {
    json!({ "path": path, "type": kind })
}

async fn repo_info(Path((owner, repo)): Path<(String, String)>, headers: HeaderMap) -> Response {
    if let Some(resp) = guard(&owner, &repo, &headers) {
        return resp;
    }
    Json(json!({ "full_name": "acme/widgets", "default_branch": "main" })).into_response()
}

async fn branches(Path((owner, repo)): Path<(String, String)>, headers: HeaderMap) -> Response {
    if let Some(resp) = guard(&owner, &repo, &headers) {
        return resp;
    }
    Json(json!([{ "name": "main" }, { "name": "release" }])).into_response()
}

#[derive(Deserialize)]
struct CommitsQuery {
    sha: String,
    per_page: usize,
}

async fn commits(
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<CommitsQuery>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = guard(&owner, &repo, &headers) {
        return resp;
    }
    if repo == "empty" {
        return (
            StatusCode::CONFLICT,
            Json(json!({"message": "Git Repository is empty."})),
        )
            .into_response();
    }
    if query.sha == "release/1.0+hotfix" {
        return Json(json!([{
            "sha": "hotfix1",
            "commit": {
                "message": "hotfix",
                "author": { "name": "Grace", "date": "2024-02-01T10:00:00Z" }
            },
            "author": null
        }]))
        .into_response();
    }
    if query.sha != "main" {
        return not_found("No commit found");
    }
    let all: Vec<serde_json::Value> = (1..=3)
        .rev()
        .map(|i| {
            json!({
                "sha": format!("sha{}", i),
                "commit": {
                    "message": format!("change {}", i),
                    "author": { "name": "Grace", "date": format!("2024-01-0{}T10:00:00Z", i) }
                },
                "author": { "avatar_url": "https://avatars.example/grace" }
            })
        })
        .take(query.per_page)
        .collect();
    Json(all).into_response()
}

async fn commit_diff(
    Path((owner, repo, sha)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = guard(&owner, &repo, &headers) {
        return resp;
    }
    let accept = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if accept != "application/vnd.github.diff" {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }
    format!("diff --git a/lib.rs b/lib.rs\n+// {}\n", sha).into_response()
}

async fn root_contents(
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = guard(&owner, &repo, &headers) {
        return resp;
    }
    if repo == "empty" {
        return not_found("This repository is empty.");
    }
    Json(json!([
        entry("README.md", "file"),
        entry("package-lock.json", "file"),
        entry("assets", "dir"),
        entry("src", "dir"),
        entry("vendor", "dir"),
    ]))
    .into_response()
}

async fn contents(
    Path((owner, repo, path)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = guard(&owner, &repo, &headers) {
        return resp;
    }
    if repo == "empty" {
        return not_found("This repository is empty.");
    }
    let body = match path.as_str() {
        "README.md" => file("README.md", "# Widgets\n\nA widget factory.\n"),
        "package-lock.json" => file("package-lock.json", "{}"),
        "assets" => json!([
            entry("assets/dump.sql", "file"),
            entry("assets/logo.png", "file"),
        ]),
        "assets/logo.png" => binary_file(
            "assets/logo.png",
            &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0xff, 0xfe],
        ),
        "assets/dump.sql" => json!({
            "path": "assets/dump.sql",
            "type": "file",
            "encoding": "none",
            "content": "",
        }),
        "src" => json!([entry("src/lib.rs", "file"), entry("src/nested", "dir")]),
        "src/lib.rs" => file("src/lib.rs", &"pub fn widget() -> u32 { 42 }\n".repeat(10)),
        "src/nested" => json!([entry("src/nested/deep.rs", "file")]),
        "src/nested/deep.rs" => file("src/nested/deep.rs", "pub struct Deep;\n"),
        "vendor" => json!([entry("vendor/tool", "symlink")]),
        _ => return not_found("Not Found"),
    };
    Json(body).into_response()
}
