//! # Repo Harness CLI (`rh`)
//!
//! Prices, ingests and keeps in sync hosted repositories.
//!
//! ## Usage
//!
//! ```bash
//! rh --config ./config/rh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rh init` | Create the SQLite database and run schema migrations |
//! | `rh estimate <url>` | Count the files ingestion would process |
//! | `rh load <url> --branch <b>` | List the documents the loader yields |
//! | `rh index <project>` | Summarize and embed the project's repository |
//! | `rh sync <project>` | Store new commits across the project's branches |
//! | `rh branches <url>` | List the repository's branches |
//! | `rh project add` | Register a project, sync once, then index |
//! | `rh token set <user> <token>` | Store a user's provider token |
//! | `rh serve` | Start the HTTP server |
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use repo_harness::{commands, config, migrate};

/// Repo Harness CLI: repository ingestion and commit sync.
#[derive(Parser)]
#[command(
    name = "rh",
    about = "Repo Harness: repository ingestion and commit sync",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Count the files in a repository, to price ingestion.
    Estimate {
        repo_url: String,

        /// Access token (defaults to the configured shared token).
        #[arg(long)]
        token: Option<String>,
    },

    /// Load a branch and print every document's path and size.
    Load {
        repo_url: String,

        #[arg(long)]
        branch: String,

        #[arg(long)]
        token: Option<String>,
    },

    /// Summarize and embed a project's repository.
    Index {
        project_id: String,

        #[arg(long)]
        token: Option<String>,
    },

    /// Sync new commits for a project.
    Sync {
        project_id: String,

        /// Acting user; their stored token is used when present.
        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// List a repository's branches.
    Branches {
        repo_url: String,

        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage stored provider tokens.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Start the HTTP server.
    Serve,
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Register a project, run one commit sync, then index it.
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        repo: String,

        /// Branch to keep in sync (repeatable). Without any, the default
        /// branch is used.
        #[arg(long = "branch")]
        branches: Vec<String>,

        #[arg(long, default_value = "cli")]
        user: String,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store (or replace) a user's token.
    Set { user: String, token: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Estimate { repo_url, token } => {
            commands::run_estimate(&cfg, &repo_url, token.as_deref()).await?;
        }
        Commands::Load {
            repo_url,
            branch,
            token,
        } => {
            commands::run_load(&cfg, &repo_url, &branch, token.as_deref()).await?;
        }
        Commands::Index { project_id, token } => {
            commands::run_index(&cfg, &project_id, token.as_deref()).await?;
        }
        Commands::Sync { project_id, user } => {
            commands::run_sync(&cfg, &project_id, &user).await?;
        }
        Commands::Branches { repo_url, user } => {
            commands::run_branches(&cfg, &repo_url, &user).await?;
        }
        Commands::Project { action } => match action {
            ProjectAction::Add {
                name,
                repo,
                branches,
                user,
            } => {
                commands::run_project_add(&cfg, &name, &repo, &branches, &user).await?;
            }
        },
        Commands::Token { action } => match action {
            TokenAction::Set { user, token } => {
                commands::run_token_set(&cfg, &user, &token).await?;
            }
        },
        Commands::Serve => {
            commands::run_serve(&cfg).await?;
        }
    }

    Ok(())
}
