//! JSON-RPC 2.0 over newline-delimited stdio.
//!
//! Each request runs in its own task so slow feed syncs do not block other
//! calls. Responses funnel through one writer task. Logs go to stderr.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::app::{DigestError, Result};
use crate::facade::{resources, tools, Facade};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<DigestError> for RpcError {
    fn from(e: DigestError) -> Self {
        let code = if e.is_client_error() {
            INVALID_PARAMS
        } else {
            INTERNAL_ERROR
        };
        Self {
            code,
            message: e.to_string(),
            data: Some(json!({ "kind": e.kind() })),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Deserialize)]
struct ResourceReadParams {
    uri: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelledParams {
    request_id: Value,
}

fn params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, RpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))
}

fn tool_result(text: String, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}

type InFlight = Arc<Mutex<HashMap<String, AbortHandle>>>;

#[derive(Clone)]
pub struct Server {
    facade: Facade,
}

impl Server {
    pub fn new(facade: Facade) -> Self {
        Self { facade }
    }

    /// Handle one request. Notifications (no id) yield no response.
    pub async fn handle(&self, request: Request) -> Option<Response> {
        let Some(id) = request.id else {
            debug!("Notification {}", request.method);
            return None;
        };
        if request.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            return Some(Response::failure(
                id,
                RpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\""),
            ));
        }

        Some(match self.dispatch(&request.method, request.params).await {
            Ok(result) => Response::success(id, result),
            Err(e) => Response::failure(id, e),
        })
    }

    async fn dispatch(
        &self,
        method: &str,
        raw: Option<Value>,
    ) -> std::result::Result<Value, RpcError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {},
                    "resources": {},
                    "prompts": {},
                },
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tools::definitions() })),
            "tools/call" => {
                let call: ToolCallParams = params(raw)?;
                Ok(match tools::call(&self.facade, &call.name, call.arguments).await {
                    Ok(value) => {
                        let text = serde_json::to_string_pretty(&value)
                            .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?;
                        tool_result(text, false)
                    }
                    Err(e) => {
                        if e.is_client_error() {
                            warn!("Tool {} rejected: {}", call.name, e);
                        } else {
                            error!("Tool {} failed: {}", call.name, e);
                        }
                        tool_result(format!("{}: {}", e.kind(), e), true)
                    }
                })
            }
            "resources/list" => Ok(json!({ "resources": resources::RESOURCES })),
            "resources/read" => {
                let read: ResourceReadParams = params(raw)?;
                let value = resources::read(&self.facade, &read.uri).await?;
                let text = serde_json::to_string_pretty(&value)
                    .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?;
                Ok(json!({
                    "contents": [{
                        "uri": read.uri,
                        "mimeType": "application/json",
                        "text": text,
                    }],
                }))
            }
            "prompts/list" => Ok(json!({ "prompts": [] })),
            "prompts/get" => Err(RpcError::new(INVALID_PARAMS, "no prompts are defined")),
            other => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            )),
        }
    }

    pub async fn serve_stdio(self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve requests from `reader` until end of input, then wait for
    /// in-flight requests to finish.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = rx.recv().await {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let in_flight: InFlight = Arc::default();
        let mut tasks = JoinSet::new();
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            while tasks.try_join_next().is_some() {}

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    warn!("Request is not valid UTF-8: {}", e);
                    let error = RpcError::new(PARSE_ERROR, e.to_string());
                    send(&tx, &Response::failure(Value::Null, error)).await;
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            let request: Request = match serde_json::from_str(line) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Unparseable request: {}", e);
                    send(&tx, &Response::failure(Value::Null, RpcError::new(PARSE_ERROR, e.to_string()))).await;
                    continue;
                }
            };

            if request.method == "notifications/cancelled" {
                cancel(&in_flight, request.params);
                continue;
            }

            let key = request.id.as_ref().map(Value::to_string);
            let server = self.clone();
            let tx = tx.clone();
            let registry = in_flight.clone();
            let task_key = key.clone();

            // Held across spawn + insert so the task cannot deregister first.
            let mut guard = in_flight.lock().ok();
            let abort = tasks.spawn(async move {
                let response = server.handle(request).await;
                if let Some(key) = task_key {
                    if let Ok(mut map) = registry.lock() {
                        map.remove(&key);
                    }
                }
                if let Some(response) = response {
                    send(&tx, &response).await;
                }
            });
            if let (Some(map), Some(key)) = (guard.as_mut(), key) {
                map.insert(key, abort);
            }
        }

        while tasks.join_next().await.is_some() {}
        drop(tx);

        match writer_task.await {
            Ok(result) => result?,
            Err(e) => error!("Writer task failed: {}", e),
        }
        debug!("Input closed, server stopping");
        Ok(())
    }
}

async fn send(tx: &mpsc::Sender<String>, response: &Response) {
    match serde_json::to_string(response) {
        Ok(line) => {
            if tx.send(line).await.is_err() {
                warn!("Response dropped: writer closed");
            }
        }
        Err(e) => error!("Failed to serialize response: {}", e),
    }
}

fn cancel(in_flight: &InFlight, raw: Option<Value>) {
    let Ok(cancelled) = params::<CancelledParams>(raw) else {
        warn!("Ignoring malformed cancellation");
        return;
    };
    let key = cancelled.request_id.to_string();
    let handle = in_flight.lock().ok().and_then(|mut map| map.remove(&key));
    match handle {
        Some(handle) => {
            handle.abort();
            debug!("Cancelled request {}", key);
        }
        None => debug!("Cancellation for unknown request {}", key),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::app::AppContext;
    use crate::facade::args::AddFeedArgs;
    use crate::facade::testing::harness;
    use crate::fetcher::{FetchResult, Fetcher, Validators};
    use crate::outline::OutlineFile;
    use crate::store::SqliteStore;

    fn request(id: i64, method: &str, params: Value) -> Request {
        Request {
            jsonrpc: Some(JSONRPC_VERSION.into()),
            id: Some(json!(id)),
            method: method.into(),
            params: Some(params),
        }
    }

    async fn run(server: Server, input: impl AsRef<[u8]>) -> Vec<Response> {
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        let reader = tokio_test::io::Builder::new().read(input.as_ref()).build();
        tokio_test::assert_ok!(server.serve(reader, server_side).await);

        let mut output = String::new();
        let mut client = client;
        client.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_advertises_capabilities() {
        let h = harness();
        let server = Server::new(h.facade.clone());
        let response = server
            .handle(request(1, "initialize", json!({})))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
        assert_eq!(result["serverInfo"]["name"], "rssdigest");
    }

    #[tokio::test]
    async fn test_tool_errors_are_results() {
        let h = harness();
        let server = Server::new(h.facade.clone());

        let ok = server
            .handle(request(
                1,
                "tools/call",
                json!({ "name": "add_feed", "arguments": { "url": "https://example.com/feed" } }),
            ))
            .await
            .unwrap();
        assert_eq!(ok.result.unwrap()["isError"], false);

        let bad = server
            .handle(request(
                2,
                "tools/call",
                json!({ "name": "add_feed", "arguments": { "url": "gopher://example.com" } }),
            ))
            .await
            .unwrap();
        let result = bad.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("invalid_input"));
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let h = harness();
        let server = Server::new(h.facade.clone());

        let missing = server
            .handle(request(1, "feeds/explode", json!({})))
            .await
            .unwrap();
        assert_eq!(missing.error.unwrap().code, METHOD_NOT_FOUND);

        let bad_params = server
            .handle(request(2, "resources/read", json!({ "url": "digest://feeds" })))
            .await
            .unwrap();
        assert_eq!(bad_params.error.unwrap().code, INVALID_PARAMS);

        let unknown = server
            .handle(request(3, "resources/read", json!({ "uri": "digest://nope" })))
            .await
            .unwrap();
        let error = unknown.error.unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert_eq!(error.data.unwrap()["kind"], "not_found");

        let notification = Request {
            jsonrpc: Some(JSONRPC_VERSION.into()),
            id: None,
            method: "notifications/initialized".into(),
            params: None,
        };
        assert!(server.handle(notification).await.is_none());
    }

    #[tokio::test]
    async fn test_resource_read_wraps_json() {
        let h = harness();
        let server = Server::new(h.facade.clone());
        let response = server
            .handle(request(1, "resources/read", json!({ "uri": "digest://stats" })))
            .await
            .unwrap();
        let contents = &response.result.unwrap()["contents"][0];
        assert_eq!(contents["uri"], "digest://stats");
        let stats: Value = serde_json::from_str(contents["text"].as_str().unwrap()).unwrap();
        assert_eq!(stats["summary"]["total_feeds"], 0);
    }

    #[tokio::test]
    async fn test_serve_over_lines() {
        let h = harness();
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
            "not json\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"prompts/list\"}\n",
        );
        let mut responses = run(Server::new(h.facade.clone()), input).await;
        responses.sort_by_key(|r| r.id.as_i64().unwrap_or(0));

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].id, Value::Null);
        assert_eq!(responses[0].error.as_ref().unwrap().code, PARSE_ERROR);
        assert_eq!(responses[1].id, json!(1));
        assert_eq!(responses[2].result.as_ref().unwrap()["prompts"], json!([]));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_stop_the_server() {
        let h = harness();
        let input: &[u8] = b"\xff\xfe\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n";
        let mut responses = run(Server::new(h.facade.clone()), input).await;
        responses.sort_by_key(|r| r.id.as_i64().unwrap_or(0));

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, Value::Null);
        assert_eq!(responses[0].error.as_ref().unwrap().code, PARSE_ERROR);
        assert_eq!(responses[1].id, json!(1));
        assert!(responses[1].error.is_none());
    }

    struct StalledFetcher;

    #[async_trait]
    impl Fetcher for StalledFetcher {
        async fn fetch(&self, _url: &str, _validators: Validators<'_>) -> Result<FetchResult> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancelled_request_gets_no_response() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let outline = OutlineFile::load(dir.path().join("feeds.opml")).unwrap();
        let ctx = AppContext::with_parts(store, Arc::new(StalledFetcher), outline, 1);
        let facade = Facade::new(Arc::new(ctx));
        facade
            .add_feed(AddFeedArgs {
                url: "https://slow.example/feed".into(),
                title: None,
                folder: None,
            })
            .await
            .unwrap();

        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"tools/call\",\"params\":{\"name\":\"sync_feeds\",\"arguments\":{\"url\":\"https://slow.example/feed\"}}}\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/cancelled\",\"params\":{\"requestId\":7}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":8,\"method\":\"ping\"}\n",
        );
        let responses = run(Server::new(facade), input).await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, json!(8));
    }
}
