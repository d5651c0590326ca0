//! MCP client engine: pending-call correlation over three transports.
//!
//! The client issues JSON-RPC requests and matches responses back to their
//! callers by id. Stdio and WebSocket are persistent connections with a
//! background reader task; HTTP is stateless, one exchange per call, with
//! session continuity carried in the `Mcp-Session-Id` header.
//!
//! # Correlation
//!
//! Ids are drawn from a process-wide monotonic counter. Each in-flight
//! request parks a oneshot sender in the pending table; the reader task (or
//! the HTTP response body) completes it. Responses whose id matches nothing
//! are dropped silently — late replies after a timeout or reconnect are
//! expected, not errors.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::mcp::framing::LineBuffer;
use crate::mcp::protocol::{
    JsonRpcRequest, OutgoingNotification, RequestId, ResponseMessage, MCP_PROTOCOL_VERSION,
};

/// Budget for establishing a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Budget for tearing a connection down.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which wire the client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Newline-delimited JSON over a child process's standard streams.
    Stdio,
    /// One message per WebSocket text frame.
    WebSocket,
    /// Stateless POST per call, with header-carried sessions.
    Http,
}

/// How to launch and talk to a stdio server process.
#[derive(Debug, Clone, Default)]
pub struct StdioOptions {
    /// Executable to spawn.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
}

/// Client configuration.
///
/// When `transport` is `None` it is inferred: `ws`/`wss` URLs select
/// WebSocket, `http`/`https` select HTTP, and stdio options select stdio.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Explicit transport selection.
    pub transport: Option<TransportKind>,
    /// Server URL (WebSocket and HTTP transports).
    pub url: Option<String>,
    /// Extra headers attached to every HTTP request and the WebSocket
    /// handshake.
    pub headers: Vec<(String, String)>,
    /// Protocol version offered during `initialize`.
    pub protocol_version: Option<String>,
    /// Child-process launch options (stdio transport).
    pub stdio: Option<StdioOptions>,
}

/// Errors surfaced to client callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// A call was attempted without a live connection.
    #[error("client is not connected")]
    NotConnected,

    /// The connection could not be established in time.
    #[error("connection attempt timed out")]
    ConnectTimeout,

    /// The connection dropped while calls were in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// The configuration is incomplete for the selected transport.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is missing or inconsistent.
        message: String,
    },

    /// Transport-level failure (socket, process, serialisation).
    #[error("transport failure: {message}")]
    Transport {
        /// The underlying failure description.
        message: String,
    },

    /// The HTTP exchange failed at the status level.
    #[error("HTTP request failed with status {status}")]
    HttpStatus {
        /// Response status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The peer answered with a JSON-RPC error.
    #[error("{message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i32,
        /// Error message from the peer.
        message: String,
        /// Structured error context, if the peer attached any.
        data: Option<Value>,
    },
}

fn transport_error(e: impl std::fmt::Display) -> ClientError {
    ClientError::Transport {
        message: e.to_string(),
    }
}

/// A tool as seen by client callers, normalised from either wire shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// JSON Schema for the tool's arguments.
    pub input_schema: Value,
}

type PendingSender = oneshot::Sender<Result<Value, ClientError>>;

/// The pending-call table shared with reader tasks.
#[derive(Default)]
struct PendingCalls {
    map: Mutex<HashMap<i64, PendingSender>>,
}

impl PendingCalls {
    async fn register(&self, id: i64) -> oneshot::Receiver<Result<Value, ClientError>> {
        let (tx, rx) = oneshot::channel();
        self.map.lock().await.insert(id, tx);
        rx
    }

    async fn discard(&self, id: i64) {
        self.map.lock().await.remove(&id);
    }

    /// Matches an inbound payload to its pending call. Payloads that do not
    /// parse, carry no id, or match nothing are dropped silently.
    async fn complete_from_payload(&self, payload: &str) {
        let Ok(envelope) = serde_json::from_str::<ResponseMessage>(payload) else {
            tracing::debug!("Dropping unparseable frame from peer");
            return;
        };
        let Some(id) = envelope.id else {
            tracing::debug!("Dropping response without id");
            return;
        };
        let key = match id {
            RequestId::Number(n) => n,
            RequestId::String(s) => match s.parse::<i64>() {
                Ok(n) => n,
                Err(_) => {
                    tracing::debug!(id = %s, "Dropping response with unrecognised id");
                    return;
                }
            },
        };

        let Some(tx) = self.map.lock().await.remove(&key) else {
            tracing::debug!(id = key, "Dropping response matching no pending call");
            return;
        };

        let outcome = match envelope.error {
            Some(error) => Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            None => Ok(envelope.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(outcome);
    }

    /// Fails every in-flight call with `error`.
    async fn flush(&self, error: &ClientError) {
        let drained: Vec<PendingSender> = self.map.lock().await.drain().map(|(_, tx)| tx).collect();
        for tx in drained {
            let _ = tx.send(Err(error.clone()));
        }
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

enum Connection {
    Disconnected,
    WebSocket {
        sink: WsSink,
        reader: JoinHandle<()>,
    },
    Stdio {
        writer: BoxedWriter,
        child: Option<Child>,
        reader: JoinHandle<()>,
    },
}

/// The MCP client.
///
/// All methods take `&self`; concurrent calls interleave freely and are
/// correlated by id.
pub struct McpClient {
    transport: TransportKind,
    url: Option<String>,
    extra_headers: Vec<(String, String)>,
    offered_version: String,
    stdio: Option<StdioOptions>,
    pipes: Mutex<Option<(BoxedReader, BoxedWriter)>>,
    http: reqwest::Client,
    next_id: AtomicI64,
    pending: Arc<PendingCalls>,
    conn: Mutex<Connection>,
    session_id: RwLock<Option<String>>,
    negotiated_version: RwLock<Option<String>>,
}

impl McpClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] when the transport cannot be
    /// determined or required settings are missing.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = match config.transport {
            Some(explicit) => explicit,
            None => infer_transport(&config)?,
        };

        match transport {
            TransportKind::WebSocket | TransportKind::Http if config.url.is_none() => {
                return Err(ClientError::Configuration {
                    message: format!("{transport:?} transport requires a url"),
                });
            }
            TransportKind::Stdio if config.stdio.is_none() => {
                return Err(ClientError::Configuration {
                    message: "stdio transport requires launch options".to_string(),
                });
            }
            _ => {}
        }

        Ok(Self {
            transport,
            url: config.url,
            extra_headers: config.headers,
            offered_version: config
                .protocol_version
                .unwrap_or_else(|| MCP_PROTOCOL_VERSION.to_string()),
            stdio: config.stdio,
            pipes: Mutex::new(None),
            http: reqwest::Client::new(),
            next_id: AtomicI64::new(1),
            pending: Arc::new(PendingCalls::default()),
            conn: Mutex::new(Connection::Disconnected),
            session_id: RwLock::new(None),
            negotiated_version: RwLock::new(None),
        })
    }

    /// Creates a WebSocket client for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] for an unusable url.
    pub fn websocket(url: impl Into<String>) -> Result<Self, ClientError> {
        Self::new(ClientConfig {
            transport: Some(TransportKind::WebSocket),
            url: Some(url.into()),
            ..ClientConfig::default()
        })
    }

    /// Creates an HTTP client for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] for an unusable url.
    pub fn http(url: impl Into<String>) -> Result<Self, ClientError> {
        Self::new(ClientConfig {
            transport: Some(TransportKind::Http),
            url: Some(url.into()),
            ..ClientConfig::default()
        })
    }

    /// Creates a stdio client that will spawn `options.command`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] for unusable launch options.
    pub fn stdio(options: StdioOptions) -> Result<Self, ClientError> {
        Self::new(ClientConfig {
            transport: Some(TransportKind::Stdio),
            stdio: Some(options),
            ..ClientConfig::default()
        })
    }

    /// Creates a stdio-mode client over pre-established pipes instead of a
    /// spawned child. Used to talk to an in-process server.
    #[must_use]
    pub fn over_pipes(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            transport: TransportKind::Stdio,
            url: None,
            extra_headers: Vec::new(),
            offered_version: MCP_PROTOCOL_VERSION.to_string(),
            stdio: None,
            pipes: Mutex::new(Some((Box::new(reader), Box::new(writer)))),
            http: reqwest::Client::new(),
            next_id: AtomicI64::new(1),
            pending: Arc::new(PendingCalls::default()),
            conn: Mutex::new(Connection::Disconnected),
            session_id: RwLock::new(None),
            negotiated_version: RwLock::new(None),
        }
    }

    /// Returns the transport this client speaks.
    #[must_use]
    pub const fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Returns the HTTP session identifier, once the server has minted one.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Returns the protocol version negotiated by `initialize`.
    pub async fn negotiated_version(&self) -> Option<String> {
        self.negotiated_version.read().await.clone()
    }

    /// Returns `true` while a persistent connection is live. Always `true`
    /// for HTTP, which has no connection to hold.
    pub async fn is_connected(&self) -> bool {
        match self.transport {
            TransportKind::Http => true,
            TransportKind::Stdio | TransportKind::WebSocket => {
                !matches!(*self.conn.lock().await, Connection::Disconnected)
            }
        }
    }

    /// Establishes the transport. A no-op for HTTP and for an
    /// already-connected client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectTimeout`] when the budget elapses, or
    /// [`ClientError::Transport`] for connection failures.
    pub async fn connect(&self) -> Result<(), ClientError> {
        match self.transport {
            TransportKind::Http => Ok(()),
            TransportKind::WebSocket => self.connect_websocket().await,
            TransportKind::Stdio => self.connect_stdio().await,
        }
    }

    async fn connect_websocket(&self) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().await;
        if !matches!(*conn, Connection::Disconnected) {
            return Ok(());
        }

        let url = self.url.as_deref().ok_or_else(|| ClientError::Configuration {
            message: "WebSocket transport requires a url".to_string(),
        })?;
        let mut request = url.into_client_request().map_err(transport_error)?;
        for (name, value) in &self.extra_headers {
            let parsed = name
                .parse::<tokio_tungstenite::tungstenite::http::HeaderName>()
                .ok()
                .zip(value.parse().ok());
            match parsed {
                Some((name, value)) => {
                    request.headers_mut().insert(name, value);
                }
                None => tracing::warn!(header = %name, "Skipping malformed header"),
            }
        }

        let (stream, _) = timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| ClientError::ConnectTimeout)?
            .map_err(transport_error)?;

        let (sink, mut source) = stream.split();
        let pending = Arc::clone(&self.pending);
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => pending.complete_from_payload(&text).await,
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            pending.flush(&ClientError::ConnectionClosed).await;
        });

        *conn = Connection::WebSocket { sink, reader };
        tracing::debug!(%url, "WebSocket connected");
        Ok(())
    }

    async fn connect_stdio(&self) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().await;
        if !matches!(*conn, Connection::Disconnected) {
            return Ok(());
        }

        // Pre-established pipes take precedence over spawning a child
        if let Some((reader, writer)) = self.pipes.lock().await.take() {
            let task = self.spawn_line_reader(reader);
            *conn = Connection::Stdio {
                writer,
                child: None,
                reader: task,
            };
            return Ok(());
        }

        let options = self.stdio.as_ref().ok_or_else(|| ClientError::Configuration {
            message: "stdio transport requires launch options".to_string(),
        })?;
        if options.command.is_empty() {
            return Err(ClientError::Configuration {
                message: "stdio transport requires a command".to_string(),
            });
        }

        let mut command = Command::new(&options.command);
        command
            .args(&options.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &options.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(transport_error)?;
        let stdin = child.stdin.take().ok_or_else(|| ClientError::Transport {
            message: "child process stdin unavailable".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ClientError::Transport {
            message: "child process stdout unavailable".to_string(),
        })?;

        // Child diagnostics go to our logs, never to the protocol stream
        if let Some(stderr) = child.stderr.take() {
            let program = options.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "mcp_conduit::child", program = %program, "{line}");
                }
            });
        }

        let task = self.spawn_line_reader(Box::new(stdout));
        *conn = Connection::Stdio {
            writer: Box::new(stdin),
            child: Some(child),
            reader: task,
        };
        tracing::debug!(command = %options.command, "stdio server spawned");
        Ok(())
    }

    /// Spawns the background task that splits the byte stream into frames
    /// and resolves pending calls. Exits on EOF or read error.
    fn spawn_line_reader(&self, mut reader: BoxedReader) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            let mut frames = LineBuffer::new();
            let mut chunk = [0_u8; 4096];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        for line in frames.push(&chunk[..n]) {
                            pending.complete_from_payload(&line).await;
                        }
                    }
                }
            }
            pending.flush(&ClientError::ConnectionClosed).await;
        })
    }

    /// Tears the transport down. Idempotent; every in-flight call fails
    /// with [`ClientError::ConnectionClosed`].
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` reserves room for teardown
    /// failures surfacing later.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let replaced = {
            let mut conn = self.conn.lock().await;
            std::mem::replace(&mut *conn, Connection::Disconnected)
        };

        match replaced {
            Connection::Disconnected => return Ok(()),
            Connection::WebSocket { mut sink, reader } => {
                let _ = timeout(DISCONNECT_TIMEOUT, sink.send(WsMessage::Close(None))).await;
                reader.abort();
            }
            Connection::Stdio {
                mut writer,
                child,
                reader,
            } => {
                let _ = timeout(DISCONNECT_TIMEOUT, writer.shutdown()).await;
                if let Some(mut child) = child {
                    let _ = timeout(DISCONNECT_TIMEOUT, child.kill()).await;
                }
                reader.abort();
            }
        }

        self.pending.flush(&ClientError::ConnectionClosed).await;
        tracing::debug!("Disconnected");
        Ok(())
    }

    /// Issues a request and waits for the correlated response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rpc`] for peer-reported errors, or a
    /// transport-level variant when the exchange itself fails.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        if self.transport == TransportKind::Http {
            return self.http_exchange(method, params, true).await;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = JsonRpcRequest::new(RequestId::Number(id), method, params);
        let line = serde_json::to_string(&payload).map_err(transport_error)?;

        let rx = self.pending.register(id).await;
        if let Err(e) = self.send_line(&line).await {
            self.pending.discard(id).await;
            return Err(e);
        }

        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Sends a notification; no response is expected or awaited.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error when the send fails.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        if self.transport == TransportKind::Http {
            self.http_exchange(method, params, false).await?;
            return Ok(());
        }

        let payload = OutgoingNotification::new(method, params);
        let line = serde_json::to_string(&payload).map_err(transport_error)?;
        self.send_line(&line).await
    }

    async fn send_line(&self, line: &str) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().await;
        match &mut *conn {
            Connection::Disconnected => Err(ClientError::NotConnected),
            Connection::WebSocket { sink, .. } => sink
                .send(WsMessage::Text(line.to_string()))
                .await
                .map_err(transport_error),
            Connection::Stdio { writer, .. } => {
                writer.write_all(line.as_bytes()).await.map_err(transport_error)?;
                writer.write_all(b"\n").await.map_err(transport_error)?;
                writer.flush().await.map_err(transport_error)
            }
        }
    }

    /// Performs the `initialize` handshake.
    ///
    /// Offers the configured protocol version, carries every known session
    /// hint shape for the server's benefit, records the session identifier
    /// and negotiated version from the reply, and returns the raw result.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn initialize(&self, client_info: Option<Value>) -> Result<Value, ClientError> {
        let mut params = Map::new();
        params.insert(
            "protocolVersion".to_string(),
            json!(self.offered_version),
        );
        if let Some(id) = self.session_id().await {
            // Both historical spellings plus the nested shape
            params.insert("sessionId".to_string(), json!(id));
            params.insert("session_id".to_string(), json!(id));
            params.insert("session".to_string(), json!({ "id": id }));
        }
        if let Some(Value::Object(extra)) = client_info {
            params.extend(extra);
        }

        let result = self.request("initialize", Some(Value::Object(params))).await?;

        if self.session_id().await.is_none() {
            if let Some(hint) = session_hint(&result) {
                *self.session_id.write().await = Some(hint);
            }
        }

        let negotiated = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(&self.offered_version)
            .to_string();
        *self.negotiated_version.write().await = Some(negotiated);

        Ok(result)
    }

    /// Sends the `initialized` acknowledgement notification.
    ///
    /// # Errors
    ///
    /// Propagates notification send failures.
    pub async fn send_initialized(&self, capabilities: Option<Value>) -> Result<(), ClientError> {
        let params = capabilities.map(|caps| json!({ "capabilities": caps }));
        self.notify("initialized", params).await
    }

    async fn http_exchange(
        &self,
        method: &str,
        params: Option<Value>,
        expect_response: bool,
    ) -> Result<Value, ClientError> {
        let url = self.url.clone().ok_or_else(|| ClientError::Configuration {
            message: "HTTP transport requires a url".to_string(),
        })?;

        let mut retried = false;
        loop {
            let mut body = Map::new();
            body.insert("jsonrpc".to_string(), json!("2.0"));
            if expect_response {
                body.insert(
                    "id".to_string(),
                    json!(self.next_id.fetch_add(1, Ordering::SeqCst)),
                );
            }
            body.insert("method".to_string(), json!(method));
            body.insert(
                "params".to_string(),
                params.clone().unwrap_or_else(|| json!({})),
            );

            let mut request = self
                .http
                .post(&url)
                .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
                .json(&Value::Object(body));
            for (name, value) in &self.extra_headers {
                request = request.header(name.as_str(), value.as_str());
            }
            let had_session = self.session_id().await;
            if let Some(id) = &had_session {
                request = request.header("Mcp-Session-Id", id.as_str());
            }
            let version = self
                .negotiated_version()
                .await
                .unwrap_or_else(|| self.offered_version.clone());
            request = request.header("MCP-Protocol-Version", version);

            let response = request.send().await.map_err(transport_error)?;

            if let Some(id) = response
                .headers()
                .get("mcp-session-id")
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
            {
                *self.session_id.write().await = Some(id.to_string());
            }

            let status = response.status();
            if !status.is_success() {
                // A 404 with a session header means the server lost the
                // session: drop it and retry once so the next initialize
                // can bootstrap
                if status == reqwest::StatusCode::NOT_FOUND && had_session.is_some() && !retried {
                    tracing::debug!("Session rejected; retrying without it");
                    *self.session_id.write().await = None;
                    retried = true;
                    continue;
                }
                if !expect_response && status == reqwest::StatusCode::NO_CONTENT {
                    return Ok(Value::Null);
                }
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::HttpStatus {
                    status: status.as_u16(),
                    body,
                });
            }

            if !expect_response {
                return Ok(Value::Null);
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let text = response.text().await.map_err(transport_error)?;

            let envelope = if content_type.starts_with("text/event-stream") {
                decode_sse_body(&text).ok_or_else(|| ClientError::Transport {
                    message: "event stream carried no response envelope".to_string(),
                })?
            } else {
                serde_json::from_str::<ResponseMessage>(&text).map_err(transport_error)?
            };

            return match envelope.error {
                Some(error) => Err(ClientError::Rpc {
                    code: error.code,
                    message: error.message,
                    data: error.data,
                }),
                None => Ok(envelope.result.unwrap_or(Value::Null)),
            };
        }
    }

    // Convenience wrappers over the method table.

    /// Lists tools, normalising both historical result shapes.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, ClientError> {
        let result = self.request("tools/list", None).await?;
        Ok(normalise_tool_list(result))
    }

    /// Invokes a tool with structured arguments.
    ///
    /// # Errors
    ///
    /// Propagates request failures; handler failures arrive as
    /// [`ClientError::Rpc`] with code -32000.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        self.request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    /// Lists the server's resources.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn list_resources(&self) -> Result<Vec<Value>, ClientError> {
        let result = self.request("resources/list", None).await?;
        Ok(array_result(result, "resources"))
    }

    /// Reads a resource; `key` is sent as both `id` and `uri` so either
    /// server convention matches.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn read_resource(&self, key: &str) -> Result<Value, ClientError> {
        self.request("resources/read", Some(json!({ "id": key, "uri": key })))
            .await
    }

    /// Lists the server's prompts.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn list_prompts(&self) -> Result<Vec<Value>, ClientError> {
        let result = self.request("prompts/list", None).await?;
        Ok(array_result(result, "prompts"))
    }

    /// Resolves a prompt by name.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, ClientError> {
        let mut params = Map::new();
        params.insert("name".to_string(), json!(name));
        if let Some(args) = arguments {
            params.insert("arguments".to_string(), args);
        }
        self.request("prompts/get", Some(Value::Object(params))).await
    }

    /// Lists the server's models.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn list_models(&self) -> Result<Vec<Value>, ClientError> {
        let result = self.request("models/list", None).await?;
        Ok(array_result(result, "models"))
    }

    /// Looks a model up by name.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn get_model(&self, name: &str) -> Result<Value, ClientError> {
        self.request("models/get", Some(json!({ "name": name }))).await
    }

    /// Selects the session's active model.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn select_model(&self, name: &str) -> Result<Value, ClientError> {
        self.request("models/select", Some(json!({ "name": name })))
            .await
    }

    /// Liveness probe.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn ping(&self) -> Result<Value, ClientError> {
        self.request("ping", None).await
    }

    /// Fetches the full metadata map.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn get_metadata(&self) -> Result<Value, ClientError> {
        self.request("metadata/current", None).await
    }

    /// Fetches a single metadata entry as `{key, value}`.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn get_metadata_entry(&self, key: &str) -> Result<Value, ClientError> {
        self.request("metadata/get", Some(json!({ "key": key }))).await
    }

    /// Asks the server to shut down, then disconnects unconditionally —
    /// even when the shutdown request itself failed.
    ///
    /// # Errors
    ///
    /// Returns the shutdown request's outcome.
    pub async fn shutdown(&self) -> Result<Value, ClientError> {
        let result = self.request("shutdown", None).await;
        let _ = self.disconnect().await;
        result
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("transport", &self.transport)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

fn infer_transport(config: &ClientConfig) -> Result<TransportKind, ClientError> {
    if let Some(url) = &config.url {
        if url.starts_with("ws://") || url.starts_with("wss://") {
            return Ok(TransportKind::WebSocket);
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(TransportKind::Http);
        }
        return Err(ClientError::Configuration {
            message: format!("cannot infer transport from url: {url}"),
        });
    }
    if config.stdio.is_some() {
        return Ok(TransportKind::Stdio);
    }
    Err(ClientError::Configuration {
        message: "no transport, url, or stdio options given".to_string(),
    })
}

/// Extracts a session identifier from an `initialize` result, accepting
/// `sessionId`, `session_id`, and the nested `session.id` shape.
fn session_hint(result: &Value) -> Option<String> {
    result
        .get("sessionId")
        .or_else(|| result.get("session_id"))
        .or_else(|| result.get("session").and_then(|s| s.get("id")))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

/// Decodes an SSE body, returning the last JSON-RPC envelope carried in a
/// `data:` payload. Multi-line data is joined with newlines per the SSE
/// framing rules.
fn decode_sse_body(body: &str) -> Option<ResponseMessage> {
    let mut last = None;
    let mut data_lines: Vec<&str> = Vec::new();

    let mut flush = |lines: &mut Vec<&str>, last: &mut Option<ResponseMessage>| {
        if lines.is_empty() {
            return;
        }
        let payload = lines.join("\n");
        lines.clear();
        if let Ok(envelope) = serde_json::from_str::<ResponseMessage>(&payload) {
            *last = Some(envelope);
        }
    };

    for line in body.lines() {
        if line.is_empty() {
            flush(&mut data_lines, &mut last);
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // Comments and other fields (event:, id:, retry:) are ignored
    }
    flush(&mut data_lines, &mut last);

    last
}

fn array_result(result: Value, field: &str) -> Vec<Value> {
    match result {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(field).or_else(|| map.remove("result")) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn normalise_tool_list(result: Value) -> Vec<ToolInfo> {
    array_result(result, "tools")
        .into_iter()
        .filter_map(normalise_tool_entry)
        .collect()
}

fn normalise_tool_entry(entry: Value) -> Option<ToolInfo> {
    let obj = entry.as_object()?;

    // Chat-completions style: { type: "function", function: {...} }
    if obj.get("type").and_then(Value::as_str) == Some("function") {
        let function = obj.get("function")?.as_object()?;
        return Some(ToolInfo {
            name: function.get("name")?.as_str()?.to_string(),
            description: function
                .get("description")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            input_schema: function
                .get("parameters")
                .cloned()
                .unwrap_or_else(|| json!({})),
        });
    }

    // Flat style: { name, description, inputSchema | parameters }
    Some(ToolInfo {
        name: obj.get("name")?.as_str()?.to_string(),
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        input_schema: obj
            .get("inputSchema")
            .or_else(|| obj.get("parameters"))
            .cloned()
            .unwrap_or_else(|| json!({})),
    })
}
