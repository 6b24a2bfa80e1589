use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::app::Result;
use crate::facade::args::{
    AddFeedArgs, BulkMarkReadArgs, EntryIdArgs, FeedUrlArgs, ListEntriesArgs, MoveFeedArgs,
    SyncAction, SyncChangesArgs, SyncFeedsArgs,
};
use crate::facade::{Facade, SyncChangesResult};
use crate::outline::Outline;
use crate::pipeline::BatchReport;

use super::ChangesAction;

pub async fn add_feed(
    facade: &Facade,
    url: String,
    title: Option<String>,
    folder: Option<String>,
) -> Result<()> {
    let added = facade.add_feed(AddFeedArgs { url, title, folder }).await?;
    let url = added.feed.url.clone();
    if added.folder.is_empty() {
        println!("Added feed: {}", url);
    } else {
        println!("Added feed: {} (in {})", url, added.folder);
    }

    // Fetch right away so the feed has a title and entries.
    match facade
        .sync_feeds(SyncFeedsArgs {
            url: Some(url),
            force: false,
        })
        .await
    {
        Ok(report) => {
            for result in &report.results {
                println!("Feed title: {}", result.title);
                println!("Fetched {} entries", result.new_entries);
            }
        }
        Err(e) => eprintln!("Initial fetch failed: {}", e),
    }
    Ok(())
}

pub async fn remove_feed(facade: &Facade, url: String) -> Result<()> {
    let removed = facade.remove_feed(FeedUrlArgs { url }).await?;
    println!(
        "Removed feed: {} ({} entries)",
        removed.url, removed.removed_entries
    );
    Ok(())
}

pub async fn move_feed(facade: &Facade, url: String, folder: String) -> Result<()> {
    let moved = facade.move_feed(MoveFeedArgs { url, folder }).await?;
    let target = if moved.folder.is_empty() {
        "the root"
    } else {
        moved.folder.as_str()
    };
    if moved.moved {
        println!("Moved {} to {}", moved.url, target);
    } else {
        println!("{} is already in {}", moved.url, target);
    }
    Ok(())
}

pub async fn update_feeds(facade: &Facade, url: Option<String>, force: bool) -> Result<()> {
    let report = facade.sync_feeds(SyncFeedsArgs { url, force }).await?;
    print_batch(&report);
    Ok(())
}

fn print_batch(report: &BatchReport) {
    if report.total_feeds == 0 {
        println!("No feeds to update");
        return;
    }

    for result in &report.results {
        match &result.error {
            Some(e) => eprintln!("  Error updating {}: {}", result.title, e),
            None if result.new_entries > 0 => {
                println!("  {} new entries from {}", result.new_entries, result.title)
            }
            None => {}
        }
    }

    println!(
        "Update complete: {} feeds, {} new entries, {} not modified, {} errors",
        report.total_feeds, report.total_new, report.total_cached, report.total_errors
    );
}

pub async fn list_feeds(facade: &Facade) -> Result<()> {
    let feeds = facade.list_feeds().await?;

    if feeds.is_empty() {
        println!("No feeds");
        return Ok(());
    }

    for view in feeds {
        let folder = view
            .feed
            .folder
            .as_deref()
            .map(|f| format!(" [{}]", f))
            .unwrap_or_default();
        println!(
            "{}{} ({} unread)\n  {}",
            view.display_title, folder, view.unread_count, view.feed.url
        );
        if let Some(error) = &view.feed.last_error {
            println!("  last error: {}", error);
        }
    }

    Ok(())
}

pub fn list_entries(
    facade: &Facade,
    unread_only: bool,
    since: Option<String>,
    limit: Option<i64>,
) -> Result<()> {
    let page = facade.list_entries(ListEntriesArgs {
        unread_only,
        since,
        limit,
        ..Default::default()
    })?;

    if page.entries.is_empty() {
        println!("No entries");
        return Ok(());
    }

    for entry in page.entries {
        let read_marker = if entry.read { " " } else { "●" };
        let date = entry
            .published_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "          ".to_string());
        let short_id: String = entry.id.chars().take(8).collect();

        println!(
            "{} {} {} {}",
            read_marker,
            short_id,
            date,
            entry.display_title()
        );
    }

    Ok(())
}

pub fn show_entry(facade: &Facade, entry_id: String) -> Result<()> {
    let view = facade.get_entry(EntryIdArgs { entry_id })?;
    let entry = &view.entry;

    println!("{}", entry.display_title());
    println!("Feed: {}", view.feed_title);
    if let Some(link) = &entry.link {
        println!("Link: {}", link);
    }
    if let Some(author) = &entry.author {
        println!("Author: {}", author);
    }
    if let Some(published) = entry.published_at {
        println!("Published: {}", published.to_rfc3339());
    }
    println!("Status: {}", if entry.read { "read" } else { "unread" });
    if let Some(content) = &entry.content {
        println!("\n{}", content);
    }
    Ok(())
}

pub async fn set_read(facade: &Facade, entry_id: String, read: bool) -> Result<()> {
    let args = EntryIdArgs { entry_id };
    let entry = if read {
        facade.mark_read(args).await?
    } else {
        facade.mark_unread(args).await?
    };
    println!(
        "Marked {} as {}",
        entry.display_title(),
        if entry.read { "read" } else { "unread" }
    );
    Ok(())
}

pub async fn catch_up(facade: &Facade, before: String) -> Result<()> {
    let result = facade.bulk_mark_read(BulkMarkReadArgs { before }).await?;
    println!("Marked {} entries read", result.marked);
    Ok(())
}

/// Import feeds from an OPML file
pub async fn import_opml(facade: &Facade, path: &Path) -> Result<()> {
    let content = std::fs::read(path)?;
    let incoming = Outline::parse(&content)?;

    if incoming.is_empty() {
        println!("No feeds found in OPML file");
        return Ok(());
    }

    println!("Found {} feeds in OPML file", incoming.len());
    let report = facade.import_outline(&incoming).await?;
    println!(
        "Import complete: {} added, {} skipped (already subscribed or invalid)",
        report.added, report.skipped
    );
    if report.added > 0 {
        println!("Run `rssdigest update` to fetch them");
    }
    Ok(())
}

pub async fn export_opml(facade: &Facade, path: Option<&Path>) -> Result<()> {
    let outline = facade.export_outline().await;
    match path {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            outline.write(&mut writer)?;
            writer.flush()?;
            eprintln!("Exported {} feeds to {}", outline.len(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            outline.write(&mut lock)?;
            writeln!(lock)?;
        }
    }
    Ok(())
}

pub async fn changes(facade: &Facade, action: ChangesAction) -> Result<()> {
    let action = match action {
        ChangesAction::Push => SyncAction::Push,
        ChangesAction::Pull => SyncAction::Pull,
        ChangesAction::Sync => SyncAction::Sync,
        ChangesAction::Status => SyncAction::Status,
    };

    match facade.sync_changes(SyncChangesArgs { action }).await? {
        SyncChangesResult::Push(push) => {
            println!("Pushed {} changes, {} pending", push.pushed, push.pending);
        }
        SyncChangesResult::Pull(pull) => {
            println!(
                "Applied {} changes ({} own skipped), cursor at {}",
                pull.applied.len(),
                pull.own,
                pull.cursor
            );
            if let Some(failed) = pull.failed {
                eprintln!("Stopped at record {}: {}", failed.seq, failed.error);
            }
        }
        SyncChangesResult::Sync { push, pull } => {
            println!("Pushed {} changes, {} pending", push.pushed, push.pending);
            println!(
                "Applied {} changes ({} own skipped), cursor at {}",
                pull.applied.len(),
                pull.own,
                pull.cursor
            );
            if let Some(failed) = pull.failed {
                eprintln!("Stopped at record {}: {}", failed.seq, failed.error);
            }
        }
        SyncChangesResult::Status(status) => {
            println!("User:      {}", status.user_id);
            println!("Device:    {}", status.device_id);
            println!("Key:       {}", status.key_id);
            println!(
                "Relay:     {}",
                if status.configured {
                    "configured"
                } else {
                    "not configured"
                }
            );
            println!("Auto-sync: {}", status.auto_sync);
            println!("Pending:   {}", status.pending);
            println!("Cursor:    {}", status.cursor);
        }
    }
    Ok(())
}
