//! End-to-end tests for the stateless HTTP transport: session minting,
//! header-based correlation, SSE push streams, and DELETE teardown.

use mcp_conduit::demo::demo_registry;
use mcp_conduit::mcp::client::{ClientError, McpClient};
use mcp_conduit::mcp::server::{McpServer, ServerConfig, ServerTransport};
use serde_json::{json, Value};

async fn start_server() -> (McpServer, String) {
    let registry = demo_registry(&[ServerTransport::Http], true);
    let server = McpServer::new(
        registry,
        ServerConfig {
            port: 0,
            path: "/mcp".to_string(),
            transports: vec![ServerTransport::Http],
        },
    );
    server.start().await.expect("Failed to start server");
    let addr = server.local_addr().await.expect("No bound address");
    (server, format!("http://{addr}/mcp"))
}

fn raw_request(method: &str, id: i64) -> String {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": {} }).to_string()
}

#[tokio::test]
async fn initialize_mints_session_and_calls_flow() {
    let (server, url) = start_server().await;
    let client = McpClient::http(&url).expect("Bad client config");

    assert_eq!(client.session_id().await, None);
    let result = client.initialize(None).await.expect("initialize failed");
    assert_eq!(result["protocolVersion"], json!("2025-06-18"));

    // The session arrived via the response header
    let session = client.session_id().await.expect("No session minted");
    assert!(!session.is_empty());
    assert_eq!(server.sessions().len().await, 1);

    // The notification is accepted with an empty 202
    client
        .send_initialized(None)
        .await
        .expect("initialized notification failed");

    let result = client
        .call_tool("sum_numbers", json!({ "values": [4, 6] }))
        .await
        .expect("tool call failed");
    assert_eq!(result["sum"], json!(10));

    server.stop().await;
}

#[tokio::test]
async fn missing_session_header_is_bad_request() {
    let (server, url) = start_server().await;

    let response = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/json")
        .body(raw_request("ping", 1))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.expect("body not JSON");
    assert_eq!(body["error"]["code"], json!(-32600));

    server.stop().await;
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (server, url) = start_server().await;

    let response = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/json")
        .header("Mcp-Session-Id", "no-such-session")
        .body(raw_request("ping", 1))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn malformed_body_is_answered_with_parse_error() {
    let (server, url) = start_server().await;

    let response = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.expect("body not JSON");
    assert_eq!(body["error"]["code"], json!(-32700));

    server.stop().await;
}

#[tokio::test]
async fn responses_echo_protocol_and_session_headers() {
    let (server, url) = start_server().await;

    let response = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/json")
        .body(raw_request("initialize", 1))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 200);

    let version = response
        .headers()
        .get("mcp-protocol-version")
        .and_then(|v| v.to_str().ok())
        .expect("missing protocol header");
    assert_eq!(version, "2025-06-18");

    let session = response
        .headers()
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .expect("missing session header");
    assert!(server.sessions().get(session).await.is_some());

    server.stop().await;
}

#[tokio::test]
async fn delete_tears_the_session_down() {
    let (server, url) = start_server().await;
    let client = McpClient::http(&url).expect("Bad client config");
    client.initialize(None).await.expect("initialize failed");
    let session = client.session_id().await.expect("No session minted");

    let http = reqwest::Client::new();
    let response = http
        .delete(&url)
        .header("Mcp-Session-Id", &session)
        .send()
        .await
        .expect("delete failed");
    assert_eq!(response.status(), 200);
    assert_eq!(server.sessions().len().await, 0);

    // The identifier is dead immediately
    let response = http
        .post(&url)
        .header("content-type", "application/json")
        .header("Mcp-Session-Id", &session)
        .body(raw_request("ping", 2))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 404);

    // Deleting again is a 404 as well
    let response = http
        .delete(&url)
        .header("Mcp-Session-Id", &session)
        .send()
        .await
        .expect("delete failed");
    assert_eq!(response.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn stale_session_retry_recovers_the_client() {
    let (server, url) = start_server().await;
    let client = McpClient::http(&url).expect("Bad client config");
    client.initialize(None).await.expect("initialize failed");
    let session = client.session_id().await.expect("No session minted");

    // The server forgets the session behind the client's back
    assert!(server.sessions().remove(&session).await);

    // A plain call fails even after the retry (it is not an initialize)...
    let err = client.ping().await.expect_err("ping must fail");
    assert!(matches!(err, ClientError::HttpStatus { status: 400, .. }));

    // ...but the retry cleared the stale id, so initialize bootstraps again
    assert_eq!(client.session_id().await, None);
    client.initialize(None).await.expect("re-initialize failed");
    assert_eq!(client.ping().await.expect("ping failed"), json!("pong"));

    server.stop().await;
}

#[tokio::test]
async fn sse_stream_delivers_pushed_events() {
    let (server, url) = start_server().await;
    let client = McpClient::http(&url).expect("Bad client config");
    client.initialize(None).await.expect("initialize failed");
    let session = client.session_id().await.expect("No session minted");

    let response = reqwest::Client::new()
        .get(&url)
        .header("Mcp-Session-Id", &session)
        .send()
        .await
        .expect("SSE open failed");
    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(content_type.starts_with("text/event-stream"));

    // Wait for the stream registration, then push through the session
    let handle = server
        .sessions()
        .get(&session)
        .await
        .expect("session vanished");
    for _ in 0..50 {
        if handle.sse_client_count().await > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(handle.sse_client_count().await > 0, "SSE stream never registered");

    handle
        .push_event(&json!({ "jsonrpc": "2.0", "method": "demo/event", "params": { "n": 7 } }))
        .await;

    let mut response = response;
    let chunk = response
        .chunk()
        .await
        .expect("stream read failed")
        .expect("stream closed early");
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("data:"), "unexpected SSE frame: {text}");
    assert!(text.contains("demo/event"), "unexpected SSE frame: {text}");

    server.stop().await;
}

#[tokio::test]
async fn idle_sse_stream_emits_a_keep_alive_comment() {
    let (server, url) = start_server().await;
    let client = McpClient::http(&url).expect("Bad client config");
    client.initialize(None).await.expect("initialize failed");
    let session = client.session_id().await.expect("No session minted");

    let mut response = reqwest::Client::new()
        .get(&url)
        .header("Mcp-Session-Id", &session)
        .send()
        .await
        .expect("SSE open failed");
    assert_eq!(response.status(), 200);

    // Nothing is pushed; a comment frame must still arrive inside the
    // client's 20 s idle window
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(20);
    let mut saw_comment = false;
    while let Ok(chunk) = tokio::time::timeout_at(deadline, response.chunk()).await {
        let Some(chunk) = chunk.expect("stream read failed") else {
            break;
        };
        let text = String::from_utf8_lossy(&chunk);
        if text.lines().any(|line| line.starts_with(':')) {
            saw_comment = true;
            break;
        }
    }
    assert!(saw_comment, "no keep-alive comment within the idle window");

    server.stop().await;
}

#[tokio::test]
async fn sse_open_requires_a_known_session() {
    let (server, url) = start_server().await;
    let http = reqwest::Client::new();

    let response = http.get(&url).send().await.expect("request failed");
    assert_eq!(response.status(), 400);

    let response = http
        .get(&url)
        .header("Mcp-Session-Id", "no-such-session")
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 404);

    server.stop().await;
}
