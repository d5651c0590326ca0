//! MCP server engine: method routing, session lifecycle, transport binding.
//!
//! The server implements the MCP lifecycle per session:
//!
//! 1. **Initialisation**: capability negotiation and version agreement
//! 2. **Operation**: tool/resource/prompt/model/metadata requests
//! 3. **Shutdown**: graceful teardown of every transport
//!
//! # Architecture
//!
//! All transports funnel into [`McpServer::handle_message`], a flat dispatch
//! on the method name. The registries are read-only after construction;
//! the only mutable state is the per-session record, owned by the
//! connection task (stdio/WebSocket) or the shared session table (HTTP).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::mcp::protocol::{
    parse_message, ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, MCP_PROTOCOL_VERSION,
    SERVER_NAME,
};
use crate::mcp::registry::{ModelEntry, ServerRegistry};
use crate::mcp::session::{SessionHandle, SessionTable};

/// Transports the server can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerTransport {
    /// Newline-delimited JSON on the process's standard streams.
    Stdio,
    /// One message per WebSocket text frame, upgraded on the HTTP path.
    Websocket,
    /// Stateless POST plus SSE push channels and DELETE teardown.
    Http,
}

/// Server configuration: where to listen and which transports to bind.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port for the HTTP listener (0 picks an ephemeral port).
    pub port: u16,
    /// URL path serving the protocol (POST/GET/DELETE and upgrades).
    pub path: String,
    /// Transports to bind; all may run concurrently.
    pub transports: Vec<ServerTransport>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3030,
            path: "/mcp".to_string(),
            transports: vec![ServerTransport::Websocket],
        }
    }
}

/// Errors from server start/stop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The HTTP listener could not be bound.
    #[error("failed to bind HTTP listener on port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// A routed reply: either a success response or a JSON-RPC error.
///
/// Notifications produce no reply at all (`Option<RouterReply>` is `None`).
#[derive(Debug, Clone)]
pub enum RouterReply {
    /// Successful response envelope.
    Success(JsonRpcResponse),
    /// Error response envelope.
    Failure(JsonRpcError),
}

impl RouterReply {
    /// Returns `true` for error replies.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Serialises the envelope to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let serialised = match self {
            Self::Success(resp) => serde_json::to_value(resp),
            Self::Failure(err) => serde_json::to_value(err),
        };
        serialised.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialise reply envelope");
            json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": { "code": ErrorCode::InternalError.code(), "message": "serialisation failure" },
            })
        })
    }

    /// Serialises the envelope to a single-line JSON string.
    #[must_use]
    pub fn to_line(&self) -> String {
        self.to_value().to_string()
    }
}

impl From<Result<JsonRpcResponse, JsonRpcError>> for RouterReply {
    fn from(result: Result<JsonRpcResponse, JsonRpcError>) -> Self {
        match result {
            Ok(resp) => Self::Success(resp),
            Err(err) => Self::Failure(err),
        }
    }
}

struct ServerInner {
    registry: Arc<ServerRegistry>,
    config: ServerConfig,
    sessions: SessionTable,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    started: AtomicBool,
    http_task: Mutex<Option<JoinHandle<()>>>,
    stdio_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<std::net::SocketAddr>>,
}

/// The MCP server. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

impl McpServer {
    /// Creates a server from a registry and configuration.
    #[must_use]
    pub fn new(registry: ServerRegistry, config: ServerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(ServerInner {
                registry: Arc::new(registry),
                config,
                sessions: SessionTable::new(),
                shutdown_tx,
                shutdown_rx,
                started: AtomicBool::new(false),
                http_task: Mutex::new(None),
                stdio_task: Mutex::new(None),
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// Returns the shared registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.inner.registry
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Returns the HTTP session table.
    #[must_use]
    pub fn sessions(&self) -> &SessionTable {
        &self.inner.sessions
    }

    /// Returns a shutdown receiver that flips to `true` on [`Self::stop`].
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_rx.clone()
    }

    /// Returns the bound HTTP listener address, once started.
    pub async fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.inner.local_addr.lock().await
    }

    /// Starts every configured transport. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the HTTP listener cannot be bound.
    pub async fn start(&self) -> Result<(), ServerError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let needs_http = self
            .inner
            .config
            .transports
            .iter()
            .any(|t| matches!(t, ServerTransport::Http | ServerTransport::Websocket));

        if needs_http {
            let listener =
                tokio::net::TcpListener::bind(("127.0.0.1", self.inner.config.port))
                    .await
                    .map_err(|source| ServerError::Bind {
                        port: self.inner.config.port,
                        source,
                    })?;
            let addr = listener.local_addr().map_err(|source| ServerError::Bind {
                port: self.inner.config.port,
                source,
            })?;
            *self.inner.local_addr.lock().await = Some(addr);

            let app = crate::mcp::http::router(self.clone());
            let mut shutdown = self.shutdown_signal();
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                // Already-signalled stop must not hang the listener
                if !*shutdown.borrow() {
                    let _ = shutdown.changed().await;
                }
            });

            let task = tokio::spawn(async move {
                if let Err(e) = serve.await {
                    tracing::error!(error = %e, "HTTP listener terminated abnormally");
                }
            });
            *self.inner.http_task.lock().await = Some(task);
            tracing::info!(%addr, path = %self.inner.config.path, "HTTP listener bound");
        }

        if self
            .inner
            .config
            .transports
            .contains(&ServerTransport::Stdio)
        {
            let server = self.clone();
            let task = tokio::spawn(async move {
                let stdin = tokio::io::stdin();
                let stdout = tokio::io::stdout();
                if let Err(e) = server.serve_connection(stdin, stdout).await {
                    tracing::error!(error = %e, "stdio transport terminated abnormally");
                }
            });
            *self.inner.stdio_task.lock().await = Some(task);
            tracing::info!("stdio transport bound");
        }

        Ok(())
    }

    /// Stops every transport: signals the HTTP listener to shut down, ends
    /// all SSE streams, clears the session table, and stops the stdio loop.
    ///
    /// Best-effort and idempotent; in-flight tool handlers are not aborted.
    pub async fn stop(&self) {
        let _ = self.inner.shutdown_tx.send(true);

        self.inner.sessions.clear().await;

        if let Some(task) = self.inner.http_task.lock().await.take() {
            let _ = task.await;
        }
        if let Some(mut task) = self.inner.stdio_task.lock().await.take() {
            // The loop exits via the shutdown signal once any in-progress
            // reply write has drained; abort covers a transport that never
            // yields
            if tokio::time::timeout(std::time::Duration::from_secs(1), &mut task)
                .await
                .is_err()
            {
                task.abort();
                let _ = task.await;
            }
        }

        self.inner.started.store(false, Ordering::SeqCst);
        tracing::info!("Server stopped");
    }

    /// Serves one line-framed duplex connection until EOF or shutdown.
    ///
    /// Used for the process's own stdio pair and directly by tests over
    /// in-memory pipes.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve_connection<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let session = detached_session();
        let mut lines = BufReader::new(reader).lines();
        let mut shutdown = self.shutdown_signal();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }

                line = lines.next_line() => {
                    let Some(line) = line? else {
                        // EOF: peer closed the stream
                        return Ok(());
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Some(reply) = self.handle_frame(&line, &session).await {
                        writer.write_all(reply.as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                        writer.flush().await?;
                    }
                }
            }
        }
    }

    /// Parses one wire frame and routes it.
    ///
    /// Returns the serialised reply line, or `None` when nothing should be
    /// written back (notifications, and malformed frames without a
    /// recoverable id — those are dropped silently).
    pub async fn handle_frame(&self, frame: &str, session: &SessionHandle) -> Option<String> {
        match parse_message(frame) {
            Ok(msg) => self
                .handle_message(msg, session)
                .await
                .map(|reply| reply.to_line()),
            Err(error) => {
                if error.id.is_some() {
                    Some(RouterReply::Failure(error).to_line())
                } else {
                    tracing::debug!("Dropping malformed frame without id");
                    None
                }
            }
        }
    }

    /// Routes a parsed message to its handler.
    ///
    /// Requests always produce a reply; notifications never do. No lock is
    /// held while a registered handler runs.
    pub async fn handle_message(
        &self,
        msg: IncomingMessage,
        session: &SessionHandle,
    ) -> Option<RouterReply> {
        match msg {
            IncomingMessage::Request(req) => Some(self.handle_request(req, session).await),
            IncomingMessage::Notification(notif) => {
                self.handle_notification(&notif, session).await;
                None
            }
        }
    }

    async fn handle_notification(&self, notif: &JsonRpcNotification, session: &SessionHandle) {
        match notif.method.as_str() {
            "initialized" | "notifications/initialized" => {
                let mut state = session.state.write().await;
                if state.initialised {
                    state.acknowledged = true;
                }
            }
            other => {
                tracing::debug!(method = other, "Ignoring notification");
            }
        }
    }

    #[allow(clippy::too_many_lines)] // one arm per protocol method
    async fn handle_request(&self, req: JsonRpcRequest, session: &SessionHandle) -> RouterReply {
        // initialize is the only method accepted before initialisation
        if req.method != "initialize" {
            let initialised = session.state.read().await.initialised;
            if !initialised {
                return RouterReply::Failure(JsonRpcError::not_initialised(req.id));
            }
        }

        let result = match req.method.as_str() {
            "initialize" => self.handle_initialize(&req, session).await,
            "ping" => Ok(JsonRpcResponse::success(req.id.clone(), json!("pong"))),
            "shutdown" => self.handle_shutdown(&req),
            "tools/list" | "list_tools" => self.handle_tools_list(&req),
            "tools/call" | "call_tool" | "tools/invoke" => {
                self.handle_tools_call(&req, session).await
            }
            "resources/list" => Ok(JsonRpcResponse::success(
                req.id.clone(),
                json!(self.inner.registry.resources()),
            )),
            "resources/read" => self.handle_resources_read(&req).await,
            "prompts/list" => Ok(JsonRpcResponse::success(
                req.id.clone(),
                json!(self.inner.registry.prompts()),
            )),
            "prompts/get" => self.handle_prompts_get(&req).await,
            "models/list" => Ok(JsonRpcResponse::success(
                req.id.clone(),
                json!(self.inner.registry.models()),
            )),
            "models/get" => self.handle_models_get(&req).await,
            "models/select" => self.handle_models_select(&req, session).await,
            "metadata/current" => self.handle_metadata_current(&req).await,
            "metadata/get" => self.handle_metadata_get(&req).await,
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        };

        RouterReply::from(result)
    }

    /// Handles `initialize`: negotiates the protocol version, recomputes
    /// capabilities, and resets session-scoped selections. Repeatable.
    async fn handle_initialize(
        &self,
        req: &JsonRpcRequest,
        session: &SessionHandle,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let client_version = req
            .params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let negotiated = client_version.unwrap_or(MCP_PROTOCOL_VERSION).to_string();

        session.state.write().await.renegotiate(negotiated.clone());

        let mut result = json!({
            "protocolVersion": negotiated,
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": self.inner.registry.capabilities(),
        });
        if let Some(instructions) = self.inner.registry.instructions() {
            result["instructions"] = instructions.clone();
        }

        tracing::debug!(protocol_version = %negotiated, "Session initialised");
        Ok(JsonRpcResponse::success(req.id.clone(), result))
    }

    /// Handles `shutdown`: answers first, then tears the transports down
    /// asynchronously.
    fn handle_shutdown(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        let server = self.clone();
        tokio::spawn(async move {
            server.stop().await;
        });
        Ok(JsonRpcResponse::success(req.id.clone(), json!("ok")))
    }

    fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "tools": self.inner.registry.tool_definitions() }),
        ))
    }

    async fn handle_tools_call(
        &self,
        req: &JsonRpcRequest,
        _session: &SessionHandle,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let params = req.params.as_ref();
        let name = params
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params(req.id.clone(), "Missing tool name"))?;

        let Some(registration) = self.inner.registry.tool(name) else {
            return Err(JsonRpcError::new(
                Some(req.id.clone()),
                JsonRpcErrorData::with_message(
                    ErrorCode::MethodNotFound,
                    format!("Unknown tool: {name}"),
                ),
            ));
        };

        // Arguments may arrive as a structured object or a JSON string
        let raw_args = params
            .and_then(|p| p.get("arguments"))
            .cloned()
            .unwrap_or(Value::Null);
        let parsed_args = match raw_args {
            Value::String(text) => serde_json::from_str(&text).map_err(|e| {
                JsonRpcError::invalid_params(
                    req.id.clone(),
                    format!("Tool arguments are not valid JSON: {e}"),
                )
            })?,
            other => other,
        };
        let args = flatten_content(parsed_args);

        let handler = registration.handler.clone();
        match handler(args).await {
            Ok(result) => Ok(JsonRpcResponse::success(req.id.clone(), result)),
            Err(failure) => {
                tracing::warn!(tool = name, error = %failure, "Tool invocation failed");
                let mut data = JsonRpcErrorData::with_message(
                    ErrorCode::ToolFailed,
                    failure.message,
                );
                if let Some(detail) = failure.detail {
                    data = data.with_data(detail);
                }
                Err(JsonRpcError::new(Some(req.id.clone()), data))
            }
        }
    }

    async fn handle_resources_read(
        &self,
        req: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let key = req
            .params
            .as_ref()
            .and_then(|p| p.get("id").or_else(|| p.get("uri")))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                JsonRpcError::invalid_params(req.id.clone(), "Missing resource id or uri")
            })?;

        let Some(reader) = self.inner.registry.resource_reader() else {
            return Err(JsonRpcError::new(
                Some(req.id.clone()),
                JsonRpcErrorData::with_message(
                    ErrorCode::MethodNotFound,
                    "resources/read not supported",
                ),
            ));
        };

        let reader = reader.clone();
        match reader(key.to_string()).await {
            Ok(result) => Ok(JsonRpcResponse::success(req.id.clone(), result)),
            Err(failure) => Err(handler_failure(req.id.clone(), failure)),
        }
    }

    async fn handle_prompts_get(
        &self,
        req: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let name = req
            .params
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params(req.id.clone(), "Missing prompt name"))?;

        let Some(getter) = self.inner.registry.prompt_getter() else {
            return Err(JsonRpcError::new(
                Some(req.id.clone()),
                JsonRpcErrorData::with_message(
                    ErrorCode::MethodNotFound,
                    "prompts/get not supported",
                ),
            ));
        };

        let args = req
            .params
            .as_ref()
            .and_then(|p| p.get("arguments"))
            .cloned();
        let getter = getter.clone();
        match getter(name.to_string(), args).await {
            Ok(result) => Ok(JsonRpcResponse::success(req.id.clone(), result)),
            Err(failure) => Err(handler_failure(req.id.clone(), failure)),
        }
    }

    async fn handle_models_get(
        &self,
        req: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let name = req
            .params
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params(req.id.clone(), "Missing model name"))?;

        let found: Option<ModelEntry> = if let Some(getter) = self.inner.registry.model_getter() {
            let getter = getter.clone();
            getter(name.to_string())
                .await
                .map_err(|failure| handler_failure(req.id.clone(), failure))?
        } else {
            self.inner
                .registry
                .models()
                .iter()
                .find(|entry| entry.name == name)
                .cloned()
        };

        found.map_or_else(
            || {
                Err(JsonRpcError::new(
                    Some(req.id.clone()),
                    JsonRpcErrorData::with_message(
                        ErrorCode::MethodNotFound,
                        format!("Unknown model: {name}"),
                    ),
                ))
            },
            |model| Ok(JsonRpcResponse::success(req.id.clone(), json!(model))),
        )
    }

    async fn handle_models_select(
        &self,
        req: &JsonRpcRequest,
        session: &SessionHandle,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let name = req
            .params
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params(req.id.clone(), "Missing model name"))?;

        if let Some(selector) = self.inner.registry.model_selector() {
            let selector = selector.clone();
            selector(name.to_string())
                .await
                .map_err(|failure| handler_failure(req.id.clone(), failure))?;
        }

        // Last write wins under concurrent selection
        session.state.write().await.selected_model = Some(name.to_string());

        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "name": name }),
        ))
    }

    async fn handle_metadata_current(
        &self,
        req: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let metadata = self
            .current_metadata()
            .await
            .map_err(|failure| handler_failure(req.id.clone(), failure))?;
        Ok(JsonRpcResponse::success(
            req.id.clone(),
            Value::Object(metadata),
        ))
    }

    async fn handle_metadata_get(
        &self,
        req: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let key = req
            .params
            .as_ref()
            .and_then(|p| p.get("key"))
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params(req.id.clone(), "Missing metadata key"))?;

        let metadata = self
            .current_metadata()
            .await
            .map_err(|failure| handler_failure(req.id.clone(), failure))?;

        metadata.get(key).map_or_else(
            || {
                Err(JsonRpcError::new(
                    Some(req.id.clone()),
                    JsonRpcErrorData::with_message(
                        ErrorCode::MethodNotFound,
                        format!("Unknown metadata key: {key}"),
                    ),
                ))
            },
            |value| {
                Ok(JsonRpcResponse::success(
                    req.id.clone(),
                    json!({ "key": key, "value": value }),
                ))
            },
        )
    }

    async fn current_metadata(
        &self,
    ) -> Result<serde_json::Map<String, Value>, crate::mcp::registry::HandlerError> {
        if let Some(getter) = self.inner.registry.metadata_getter() {
            let getter = getter.clone();
            getter().await
        } else {
            Ok(self.inner.registry.metadata().clone())
        }
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

/// Creates a session handle owned by a single connection (not in any table).
///
/// The id only appears in logs for stdio/WebSocket connections.
#[must_use]
pub fn detached_session() -> SessionHandle {
    SessionHandle::for_connection(Uuid::new_v4().to_string())
}

fn handler_failure(id: RequestId, failure: crate::mcp::registry::HandlerError) -> JsonRpcError {
    let mut data = JsonRpcErrorData::with_message(ErrorCode::ToolFailed, failure.message);
    if let Some(detail) = failure.detail {
        data = data.with_data(detail);
    }
    JsonRpcError::new(Some(id), data)
}

/// Recursively replaces `{type:"text", text}` content envelopes with their
/// plain string, so tool handlers never see the transport-level wrapper.
#[must_use]
pub fn flatten_content(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let is_text_envelope = map.get("type").and_then(Value::as_str) == Some("text")
                && map.get("text").is_some_and(Value::is_string)
                && map.keys().all(|k| k == "type" || k == "text");
            if is_text_envelope {
                return map.get("text").cloned().unwrap_or(Value::Null);
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, flatten_content(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(flatten_content).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::registry::{HandlerError, ToolDefinition, ToolRegistration};

    fn test_server() -> McpServer {
        let registry = ServerRegistry::new()
            .with_tool(ToolRegistration::new(
                ToolDefinition {
                    name: "echo".to_string(),
                    description: None,
                    input_schema: json!({ "type": "object" }),
                },
                |args| async move { Ok(args) },
            ))
            .with_tool(ToolRegistration::new(
                ToolDefinition {
                    name: "always_fails".to_string(),
                    description: None,
                    input_schema: json!({ "type": "object" }),
                },
                |_args| async {
                    Err(HandlerError::new("deliberate failure")
                        .with_detail(json!({ "stack": "test" })))
                },
            ));
        McpServer::new(registry, ServerConfig::default())
    }

    async fn initialised_session(server: &McpServer) -> SessionHandle {
        let session = detached_session();
        let init = JsonRpcRequest::new(RequestId::Number(0), "initialize", Some(json!({})));
        let reply = server
            .handle_message(IncomingMessage::Request(init), &session)
            .await
            .unwrap();
        assert!(!reply.is_error());
        session
    }

    fn request(id: i64, method: &str, params: Value) -> IncomingMessage {
        IncomingMessage::Request(JsonRpcRequest::new(RequestId::Number(id), method, Some(params)))
    }

    #[tokio::test]
    async fn rejects_before_initialize() {
        let server = test_server();
        let session = detached_session();
        let reply = server
            .handle_message(request(1, "tools/list", json!({})), &session)
            .await
            .unwrap();
        let RouterReply::Failure(err) = reply else {
            panic!("expected failure");
        };
        assert_eq!(err.error.code, -32002);
    }

    #[tokio::test]
    async fn initialize_negotiates_and_repeats() {
        let server = test_server();
        let session = detached_session();

        let reply = server
            .handle_message(
                request(1, "initialize", json!({ "protocolVersion": "2024-11-05" })),
                &session,
            )
            .await
            .unwrap();
        let RouterReply::Success(resp) = reply else {
            panic!("expected success");
        };
        assert_eq!(resp.result["protocolVersion"], json!("2024-11-05"));
        assert_eq!(resp.result["capabilities"]["tools"]["call"], json!(true));

        // Select a model, then re-initialise: the selection resets
        session.state.write().await.selected_model = Some("m".to_string());
        let reply = server
            .handle_message(request(2, "initialize", json!({})), &session)
            .await
            .unwrap();
        assert!(!reply.is_error());
        assert_eq!(session.state.read().await.selected_model, None);
    }

    #[tokio::test]
    async fn unknown_method_not_found() {
        let server = test_server();
        let session = initialised_session(&server).await;
        let reply = server
            .handle_message(request(5, "bogus/method", json!({})), &session)
            .await
            .unwrap();
        let RouterReply::Failure(err) = reply else {
            panic!("expected failure");
        };
        assert_eq!(err.error.code, -32601);
    }

    #[tokio::test]
    async fn unknown_tool_is_method_not_found() {
        let server = test_server();
        let session = initialised_session(&server).await;
        let reply = server
            .handle_message(
                request(5, "tools/call", json!({ "name": "missing", "arguments": {} })),
                &session,
            )
            .await
            .unwrap();
        let RouterReply::Failure(err) = reply else {
            panic!("expected failure");
        };
        assert_eq!(err.error.code, -32601);
        assert!(err.error.message.contains("missing"));
    }

    #[tokio::test]
    async fn tool_failure_maps_to_application_error() {
        let server = test_server();
        let session = initialised_session(&server).await;
        let reply = server
            .handle_message(
                request(6, "tools/call", json!({ "name": "always_fails", "arguments": {} })),
                &session,
            )
            .await
            .unwrap();
        let RouterReply::Failure(err) = reply else {
            panic!("expected failure");
        };
        assert_eq!(err.error.code, -32000);
        assert_eq!(err.error.message, "deliberate failure");
        assert_eq!(err.error.data, Some(json!({ "stack": "test" })));
    }

    #[tokio::test]
    async fn string_arguments_are_parsed() {
        let server = test_server();
        let session = initialised_session(&server).await;
        let reply = server
            .handle_message(
                request(
                    7,
                    "tools/call",
                    json!({ "name": "echo", "arguments": "{\"x\": 4}" }),
                ),
                &session,
            )
            .await
            .unwrap();
        let RouterReply::Success(resp) = reply else {
            panic!("expected success");
        };
        assert_eq!(resp.result, json!({ "x": 4 }));
    }

    #[tokio::test]
    async fn tool_call_aliases_route() {
        let server = test_server();
        let session = initialised_session(&server).await;
        for method in ["tools/call", "call_tool", "tools/invoke"] {
            let reply = server
                .handle_message(
                    request(8, method, json!({ "name": "echo", "arguments": { "a": 1 } })),
                    &session,
                )
                .await
                .unwrap();
            assert!(!reply.is_error(), "alias {method} failed");
        }
    }

    #[tokio::test]
    async fn ping_pongs() {
        let server = test_server();
        let session = initialised_session(&server).await;
        let reply = server
            .handle_message(request(9, "ping", json!({})), &session)
            .await
            .unwrap();
        let RouterReply::Success(resp) = reply else {
            panic!("expected success");
        };
        assert_eq!(resp.result, json!("pong"));
    }

    #[tokio::test]
    async fn notifications_produce_no_reply() {
        let server = test_server();
        let session = initialised_session(&server).await;
        let notif = IncomingMessage::Notification(JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: "notifications/initialized".to_string(),
            params: None,
        });
        assert!(server.handle_message(notif, &session).await.is_none());
        assert!(session.state.read().await.acknowledged);
    }

    #[tokio::test]
    async fn malformed_frame_without_id_is_dropped() {
        let server = test_server();
        let session = detached_session();
        assert!(server.handle_frame("{nonsense", &session).await.is_none());
        assert!(server
            .handle_frame(r#"{"method": "x"}"#, &session)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn malformed_request_with_id_is_answered() {
        let server = test_server();
        let session = detached_session();
        let reply = server
            .handle_frame(r#"{"id": 3, "method": "x"}"#, &session)
            .await
            .unwrap();
        assert!(reply.contains("-32600"));
        assert!(reply.contains("\"id\":3"));
    }

    #[test]
    fn flatten_content_unwraps_text_envelopes() {
        let input = json!({
            "message": { "type": "text", "text": "hello" },
            "nested": [{ "type": "text", "text": "a" }, 5],
            "kept": { "type": "text", "text": "x", "extra": 1 },
        });
        let flattened = flatten_content(input);
        assert_eq!(flattened["message"], json!("hello"));
        assert_eq!(flattened["nested"], json!(["a", 5]));
        // Objects with extra keys are not envelopes
        assert_eq!(flattened["kept"]["text"], json!("x"));
    }
}
