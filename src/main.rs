use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rssdigest::app::AppContext;
use rssdigest::cli::{commands, Cli, Commands};
use rssdigest::config::Config;
use rssdigest::facade::Facade;
use rssdigest::rpc::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries JSON-RPC, so logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    cli.apply(&mut config);

    let ctx = AppContext::from_config(&config)?;
    let facade = Facade::new(Arc::new(ctx));

    match cli.command {
        Commands::Serve => {
            Server::new(facade).serve_stdio().await?;
        }
        Commands::Add { url, title, folder } => {
            commands::add_feed(&facade, url, title, folder).await?;
        }
        Commands::Remove { url } => {
            commands::remove_feed(&facade, url).await?;
        }
        Commands::Move { url, folder } => {
            commands::move_feed(&facade, url, folder).await?;
        }
        Commands::Update { url, force } => {
            commands::update_feeds(&facade, url, force).await?;
        }
        Commands::List {
            entries,
            unread,
            since,
            limit,
        } => {
            if entries || unread {
                commands::list_entries(&facade, unread, since, limit)?;
            } else {
                commands::list_feeds(&facade).await?;
            }
        }
        Commands::Show { entry_id } => {
            commands::show_entry(&facade, entry_id)?;
        }
        Commands::Read { entry_id } => {
            commands::set_read(&facade, entry_id, true).await?;
        }
        Commands::Unread { entry_id } => {
            commands::set_read(&facade, entry_id, false).await?;
        }
        Commands::Catchup { before } => {
            commands::catch_up(&facade, before).await?;
        }
        Commands::Import { path } => {
            commands::import_opml(&facade, &path).await?;
        }
        Commands::Export { path } => {
            commands::export_opml(&facade, path.as_deref()).await?;
        }
        Commands::Changes { action } => {
            commands::changes(&facade, action).await?;
        }
    }

    Ok(())
}
