pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "rssdigest")]
#[command(about = "A feed reader served to agents over JSON-RPC", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/rssdigest/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Subscription outline (OPML) path
    #[arg(long, global = true)]
    pub outline: Option<PathBuf>,

    /// Number of parallel workers for fetching feeds
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(db) = &self.db {
            config.storage.db_path = Some(db.clone());
        }
        if let Some(outline) = &self.outline {
            config.storage.outline_path = Some(outline.clone());
        }
        if let Some(workers) = self.workers {
            config.fetch.workers = workers;
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve tools and resources over JSON-RPC on stdin/stdout
    Serve,
    /// Add a new feed and fetch it
    Add {
        /// URL of the feed to add
        url: String,
        #[arg(long)]
        title: Option<String>,
        /// Folder to file the feed under
        #[arg(long)]
        folder: Option<String>,
    },
    /// Remove a feed and its entries
    Remove {
        /// URL of the feed to remove
        url: String,
    },
    /// Move a feed to another folder ("" for the root)
    Move { url: String, folder: String },
    /// Fetch new entries for all feeds, or one
    Update {
        /// Only this feed
        url: Option<String>,
        /// Ignore cached ETag/Last-Modified
        #[arg(short, long)]
        force: bool,
    },
    /// List feeds or entries
    List {
        /// Show entries instead of feeds
        #[arg(long)]
        entries: bool,
        /// Only unread entries
        #[arg(long)]
        unread: bool,
        /// Entries published on or after (today, week, YYYY-MM-DD, ...)
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Show one entry
    Show { entry_id: String },
    /// Mark an entry as read
    Read { entry_id: String },
    /// Mark an entry as unread
    Unread { entry_id: String },
    /// Mark everything published before a date as read
    Catchup {
        #[arg(long, default_value = "today")]
        before: String,
    },
    /// Import feeds from an OPML file
    Import {
        /// Path to the OPML file
        path: PathBuf,
    },
    /// Export subscriptions as OPML (stdout when no path is given)
    Export { path: Option<PathBuf> },
    /// Replicate subscriptions and read state through the relay
    Changes {
        #[command(subcommand)]
        action: ChangesAction,
    },
}

#[derive(Subcommand, Clone, Copy)]
pub enum ChangesAction {
    /// Upload queued local changes
    Push,
    /// Download and apply remote changes
    Pull,
    /// Push, then pull
    Sync,
    /// Show replication state
    Status,
}
