//! # rssdigest
//!
//! An offline-first RSS/Atom reader that agents drive over JSON-RPC, with
//! end-to-end encrypted replication of subscriptions and read state.
//!
//! ## Architecture
//!
//! ```text
//! Fetcher → Normalizer → Store ← Pipeline
//!                          ↑
//! RPC / CLI → Facade → Outline + Change log → Relay
//! ```
//!
//! - [`fetcher`]: HTTP client with ETag/conditional request support
//! - [`normalizer`]: Converts RSS/Atom/JSON feeds to entries
//! - [`store`]: SQLite persistence layer
//! - [`outline`]: The OPML subscription file
//! - [`changelog`]: Encrypted change records and the relay synchronizer
//! - [`rpc`]: JSON-RPC server over stdio
//!
//! ## Quick Start
//!
//! ```bash
//! # Add a feed
//! rssdigest add https://blog.rust-lang.org/feed.xml --folder Rust
//!
//! # Update all feeds
//! rssdigest update
//!
//! # List unread entries
//! rssdigest list --unread
//!
//! # Serve an agent on stdin/stdout
//! rssdigest serve
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// store, fetcher, pipeline, outline and synchronizer.
pub mod app;

/// Change-log replication.
///
/// - [`Change`](changelog::Change): A feed or read-state change record
/// - [`KeyMaterial`](changelog::KeyMaterial): Keys derived from the seed phrase
/// - [`Relay`](changelog::Relay): Stores opaque envelopes for other devices
/// - [`Synchronizer`](changelog::Synchronizer): Queue, push, pull and apply
pub mod changelog;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/rssdigest/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`Feed`](domain::Feed): A subscribed feed and its fetch bookkeeping
/// - [`Entry`](domain::Entry): One item of a feed with its read state
pub mod domain;

/// Operations shared by the RPC tools, resources and the CLI.
pub mod facade;

/// HTTP fetching with conditional request support.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for feed fetching
/// - [`HttpFetcher`](fetcher::http_fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Feed parsing and normalization.
///
/// Converts RSS 0.9x/1.0/2.0, Atom 0.3/1.0, and JSON Feed 1.0 into
/// [`NewEntry`](domain::NewEntry) values.
pub mod normalizer;

/// Subscription outline (OPML) kept in sync with the store.
pub mod outline;

/// Fetch, parse and ingest, for one feed or many in parallel.
pub mod pipeline;

/// JSON-RPC 2.0 server on stdin/stdout.
pub mod rpc;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;
