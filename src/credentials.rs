//! Provider token resolution.
//!
//! A user's own stored token wins; otherwise the shared service token from
//! `[github] token` is used. Tokens are not validated up front: a bad one
//! surfaces as a provider error from the first call that uses it.

use anyhow::Result;

use repo_harness_core::store::KnowledgeStore;

/// Token to act with on behalf of `user_id`, if any.
pub async fn resolve_token(
    store: &dyn KnowledgeStore,
    user_id: &str,
    shared: Option<&str>,
) -> Result<Option<String>> {
    let own = store
        .user_token(user_id)
        .await?
        .filter(|t| !t.trim().is_empty());

    if own.is_some() {
        return Ok(own);
    }
    Ok(shared.map(str::to_string))
}
