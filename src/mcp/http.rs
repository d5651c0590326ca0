//! HTTP binding: stateless POST requests, WebSocket upgrades, SSE push
//! streams, and DELETE session teardown, all on one configurable path.
//!
//! # Session correlation
//!
//! HTTP is stateless, so the server mints a session on the bootstrapping
//! `initialize` POST and returns its identifier in the `Mcp-Session-Id`
//! response header. Every later call must echo that header; a missing header
//! is a 400, an unknown one a 404. `GET` without an upgrade opens an SSE
//! stream bound to the session; `DELETE` tears the session down.
//!
//! WebSocket connections upgraded on the same path carry their own
//! connection-scoped session and never touch the table.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::mcp::protocol::{
    parse_message, ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData,
    MCP_PROTOCOL_VERSION,
};
use crate::mcp::server::{detached_session, McpServer};

/// Request/response header carrying the session identifier.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Response header advertising the negotiated protocol version.
pub const PROTOCOL_HEADER: &str = "mcp-protocol-version";

/// Keep-alive comments must arrive well inside the client's 20s idle window.
const SSE_KEEPALIVE: Duration = Duration::from_secs(15);

/// Builds the router serving the protocol on the configured path.
pub fn router(server: McpServer) -> Router {
    let path = server.config().path.clone();
    Router::new()
        .route(
            &path,
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .with_state(server)
}

async fn handle_post(
    State(server): State<McpServer>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let msg = match parse_message(&body) {
        Ok(msg) => msg,
        Err(error) => {
            // Unparseable POST bodies are answered, not dropped: the HTTP
            // request itself demands a response
            return envelope_response(
                StatusCode::BAD_REQUEST,
                None,
                &serde_json::to_value(&error).unwrap_or_default(),
            );
        }
    };

    let header_id = session_header(&headers);

    match msg {
        IncomingMessage::Request(ref req) if req.method == "initialize" => {
            // Bootstrap: reuse a valid session, otherwise mint one
            let session = match &header_id {
                Some(id) => match server.sessions().get(id).await {
                    Some(existing) => existing,
                    None => server.sessions().create().await,
                },
                None => server.sessions().create().await,
            };
            let reply = server.handle_message(msg, &session).await;
            let body = reply.map_or(Value::Null, |r| r.to_value());
            envelope_response(StatusCode::OK, Some(&session.id), &body)
        }

        other => {
            let Some(id) = header_id else {
                return rejection(
                    StatusCode::BAD_REQUEST,
                    "Missing Mcp-Session-Id header",
                );
            };
            let Some(session) = server.sessions().get(&id).await else {
                return rejection(StatusCode::NOT_FOUND, "Unknown session");
            };

            match server.handle_message(other, &session).await {
                // Application-level errors still travel as 200 envelopes
                Some(reply) => {
                    envelope_response(StatusCode::OK, Some(&session.id), &reply.to_value())
                }
                // Notification: accepted, nothing to say
                None => {
                    let mut resp = StatusCode::ACCEPTED.into_response();
                    apply_headers(resp.headers_mut(), Some(&session.id));
                    resp
                }
            }
        }
    }
}

/// `GET` is shared: an upgrade request becomes a WebSocket connection, a
/// plain request opens an SSE push stream for the session in the header.
async fn handle_get(
    State(server): State<McpServer>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    headers: HeaderMap,
) -> Response {
    if let Ok(upgrade) = upgrade {
        return upgrade.on_upgrade(move |socket| serve_websocket(server, socket));
    }

    let Some(id) = session_header(&headers) else {
        return rejection(StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header");
    };
    let Some(session) = server.sessions().get(&id).await else {
        return rejection(StatusCode::NOT_FOUND, "Unknown session");
    };

    let rx = session.open_sse_channel().await;
    let stream = UnboundedReceiverStream::new(rx)
        .map(|event| Ok::<Event, Infallible>(Event::default().data(event.to_string())));

    let mut resp = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(SSE_KEEPALIVE).text("heartbeat"))
        .into_response();
    apply_headers(resp.headers_mut(), Some(&session.id));
    tracing::debug!(session_id = %session.id, "Opened SSE stream");
    resp
}

async fn handle_delete(State(server): State<McpServer>, headers: HeaderMap) -> Response {
    let Some(id) = session_header(&headers) else {
        return rejection(StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header");
    };
    if !server.sessions().remove(&id).await {
        return rejection(StatusCode::NOT_FOUND, "Unknown session");
    }

    envelope_response(
        StatusCode::OK,
        None,
        &json!({ "jsonrpc": "2.0", "result": { "status": "terminated" } }),
    )
}

/// Per-connection WebSocket loop: one message per text frame, replies sent
/// in processing order, closed by the peer or by server shutdown.
async fn serve_websocket(server: McpServer, socket: WebSocket) {
    let session = detached_session();
    let (mut sink, mut stream) = socket.split();
    let mut shutdown = server.shutdown_signal();

    tracing::debug!(session_id = %session.id, "WebSocket connection opened");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }

            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        if let Some(reply) = server.handle_frame(text.as_str(), &session).await {
                            if sink.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    // Pings are answered by the protocol layer; binary
                    // frames are not part of the wire format
                    _ => {}
                }
            }
        }
    }

    tracing::debug!(session_id = %session.id, "WebSocket connection closed");
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn apply_headers(headers: &mut HeaderMap, session_id: Option<&str>) {
    headers.insert(
        HeaderName::from_static(PROTOCOL_HEADER),
        HeaderValue::from_static(MCP_PROTOCOL_VERSION),
    );
    if let Some(id) = session_id {
        if let Ok(value) = HeaderValue::from_str(id) {
            headers.insert(HeaderName::from_static(SESSION_HEADER), value);
        }
    }
}

fn envelope_response(status: StatusCode, session_id: Option<&str>, body: &Value) -> Response {
    let mut resp = (status, body.to_string()).into_response();
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    apply_headers(resp.headers_mut(), session_id);
    resp
}

/// Transport-level rejection carrying a JSON-RPC error envelope.
fn rejection(status: StatusCode, message: &str) -> Response {
    let error = JsonRpcError::new(
        None,
        JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, message),
    );
    envelope_response(
        status,
        None,
        &serde_json::to_value(&error).unwrap_or_default(),
    )
}
