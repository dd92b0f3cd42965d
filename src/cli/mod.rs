pub mod dispatch;

pub use dispatch::dispatch;

use crate::model::{PinTargetType, Scope, Timestamp};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// `capsule-memory` - local, durable, searchable memory for coding agents.
#[derive(Parser, Debug)]
#[command(name = "capsule-memory")]
#[command(version = "0.1.0")]
#[command(about = "Inspect and manage capsule memory.", long_about = None)]
pub struct Cli {
    /// Database file (overrides config and CAPSULE_MEMORY_DB)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Scope dimensions shared by most commands.
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    #[arg(long)]
    pub session: Option<String>,
    #[arg(long)]
    pub repo: Option<String>,
    #[arg(long)]
    pub agent: Option<String>,
    #[arg(long)]
    pub user: Option<String>,
}

impl ScopeArgs {
    pub fn to_scope(&self) -> Scope {
        Scope {
            session_id: self.session.clone(),
            repo_id: self.repo.clone(),
            agent_id: self.agent.clone(),
            user_id: self.user.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pin an observation or summary so recall always returns it
    Pin {
        target_id: String,

        #[arg(long, default_value = "observation")]
        target_type: PinTargetType,

        #[arg(long)]
        reason: Option<String>,

        /// Expiry as RFC 3339 or epoch milliseconds
        #[arg(long, value_parser = parse_timestamp)]
        expires: Option<Timestamp>,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Delete a pin
    Unpin { id: String },

    /// List active pins
    Pins {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Redact an observation's content
    Forget { id: String },

    /// List observations, newest first
    Observations {
        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(long, value_parser = parse_timestamp)]
        since: Option<Timestamp>,

        #[arg(long, value_parser = parse_timestamp)]
        until: Option<Timestamp>,

        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(long)]
        include_redacted: bool,
    },

    /// Show a capsule with its latest summary
    Capsule { id: String },

    /// Full-text search over observations and summaries
    Search {
        query: String,

        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(long)]
        include_redacted: bool,
    },

    /// Pins, current summary and ranked candidates within a token budget
    Recall {
        query: String,

        #[command(flatten)]
        scope: ScopeArgs,

        /// Token budget (overrides config)
        #[arg(long)]
        budget: Option<usize>,

        #[arg(long)]
        max_candidates: Option<usize>,

        #[arg(long)]
        include_redacted: bool,
    },

    /// Write an export bundle
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(long)]
        include_redacted: bool,

        #[arg(long)]
        description: Option<String>,

        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Restore a bundle into the database
    Import {
        path: PathBuf,

        /// Report what would be imported without writing
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        skip_validation: bool,
    },

    /// Merge bundles; the first bundle wins on shared ids
    Merge {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Compare the ids in two bundles
    Diff { a: PathBuf, b: PathBuf },

    /// Row counts and schema version
    Stats,

    /// Rebuild the full-text indexes
    Reindex,
}

/// RFC 3339 or integer epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Result<Timestamp, String> {
    if let Ok(millis) = raw.parse::<Timestamp>() {
        return Ok(millis);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| format!("expected RFC 3339 or epoch milliseconds: {e}"))
}
