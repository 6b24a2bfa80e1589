use serde::Serialize;
use serde_json::{json, Value};

use crate::app::{DigestError, Result};
use crate::facade::args::parse_args;
use crate::facade::Facade;

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn url_property() -> Value {
    json!({ "type": "string", "description": "Feed URL (http or https)" })
}

fn entry_id_property() -> Value {
    json!({ "type": "string", "description": "Entry id or a unique prefix of at least 8 characters" })
}

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "list_feeds",
            description: "List subscribed feeds with folder and unread count",
            input_schema: schema(json!({}), &[]),
        },
        ToolDefinition {
            name: "add_feed",
            description: "Subscribe to a feed",
            input_schema: schema(
                json!({
                    "url": url_property(),
                    "title": { "type": "string" },
                    "folder": { "type": "string", "description": "Folder name; empty for the root" },
                }),
                &["url"],
            ),
        },
        ToolDefinition {
            name: "remove_feed",
            description: "Unsubscribe from a feed and delete its entries",
            input_schema: schema(json!({ "url": url_property() }), &["url"]),
        },
        ToolDefinition {
            name: "move_feed",
            description: "Move a feed to another folder",
            input_schema: schema(
                json!({
                    "url": url_property(),
                    "folder": { "type": "string", "description": "Target folder; empty for the root" },
                }),
                &["url", "folder"],
            ),
        },
        ToolDefinition {
            name: "sync_feeds",
            description: "Fetch new entries for one feed or all feeds",
            input_schema: schema(
                json!({
                    "url": url_property(),
                    "force": { "type": "boolean", "description": "Ignore cached validators" },
                }),
                &[],
            ),
        },
        ToolDefinition {
            name: "list_entries",
            description: "List entries, newest first",
            input_schema: schema(
                json!({
                    "feed_id": { "type": "string" },
                    "unread_only": { "type": "boolean" },
                    "since": { "type": "string", "description": "today, yesterday, week, month, YYYY-MM-DD or RFC 3339" },
                    "until": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 0 },
                    "offset": { "type": "integer", "minimum": 0 },
                }),
                &[],
            ),
        },
        ToolDefinition {
            name: "get_entry",
            description: "Show one entry with its content",
            input_schema: schema(json!({ "entry_id": entry_id_property() }), &["entry_id"]),
        },
        ToolDefinition {
            name: "mark_read",
            description: "Mark an entry as read",
            input_schema: schema(json!({ "entry_id": entry_id_property() }), &["entry_id"]),
        },
        ToolDefinition {
            name: "mark_unread",
            description: "Mark an entry as unread",
            input_schema: schema(json!({ "entry_id": entry_id_property() }), &["entry_id"]),
        },
        ToolDefinition {
            name: "bulk_mark_read",
            description: "Mark every entry published before a date as read",
            input_schema: schema(
                json!({ "before": { "type": "string", "description": "today, yesterday, week, month, YYYY-MM-DD or RFC 3339" } }),
                &["before"],
            ),
        },
        ToolDefinition {
            name: "sync_changes",
            description: "Replicate subscriptions and read state with other devices",
            input_schema: schema(
                json!({ "action": { "type": "string", "enum": ["push", "pull", "sync", "status"] } }),
                &[],
            ),
        },
    ]
}

/// Run a tool by name and serialize its result.
pub async fn call(facade: &Facade, name: &str, args: Option<Value>) -> Result<Value> {
    tracing::debug!("Calling tool {}", name);
    let value = match name {
        "list_feeds" => serde_json::to_value(facade.list_feeds().await?)?,
        "add_feed" => serde_json::to_value(facade.add_feed(parse_args(args)?).await?)?,
        "remove_feed" => serde_json::to_value(facade.remove_feed(parse_args(args)?).await?)?,
        "move_feed" => serde_json::to_value(facade.move_feed(parse_args(args)?).await?)?,
        "sync_feeds" => serde_json::to_value(facade.sync_feeds(parse_args(args)?).await?)?,
        "list_entries" => serde_json::to_value(facade.list_entries(parse_args(args)?)?)?,
        "get_entry" => serde_json::to_value(facade.get_entry(parse_args(args)?)?)?,
        "mark_read" => serde_json::to_value(facade.mark_read(parse_args(args)?).await?)?,
        "mark_unread" => serde_json::to_value(facade.mark_unread(parse_args(args)?).await?)?,
        "bulk_mark_read" => {
            serde_json::to_value(facade.bulk_mark_read(parse_args(args)?).await?)?
        }
        "sync_changes" => serde_json::to_value(facade.sync_changes(parse_args(args)?).await?)?,
        other => return Err(DigestError::NotFound(format!("tool {other}"))),
    };
    Ok(value)
}
