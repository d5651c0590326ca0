//! End-to-end tests over in-memory stdio pipes.
//!
//! These tests wire a client and server together through duplex pipes, so
//! the full line-framed wire format is exercised without spawning a child
//! process.

use mcp_conduit::demo::demo_registry;
use mcp_conduit::mcp::client::{ClientError, McpClient};
use mcp_conduit::mcp::server::{McpServer, ServerConfig, ServerTransport};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

fn demo_server() -> McpServer {
    let registry = demo_registry(&[ServerTransport::Stdio], true);
    McpServer::new(
        registry,
        ServerConfig {
            transports: vec![ServerTransport::Stdio],
            ..ServerConfig::default()
        },
    )
}

/// Wires a connected client/server pair over duplex pipes.
async fn connected_pair() -> (McpServer, McpClient, JoinHandle<std::io::Result<()>>) {
    let server = demo_server();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (server_rx, server_tx) = tokio::io::split(server_io);
    let (client_rx, client_tx) = tokio::io::split(client_io);

    let serve = {
        let server = server.clone();
        tokio::spawn(async move { server.serve_connection(server_rx, server_tx).await })
    };

    let client = McpClient::over_pipes(client_rx, client_tx);
    client.connect().await.expect("Failed to connect client");

    (server, client, serve)
}

async fn initialise(client: &McpClient) -> serde_json::Value {
    let result = client.initialize(None).await.expect("initialize failed");
    client
        .send_initialized(None)
        .await
        .expect("initialized notification failed");
    result
}

#[tokio::test]
async fn handshake_negotiates_version_and_capabilities() {
    let (_server, client, _serve) = connected_pair().await;

    let result = initialise(&client).await;

    assert_eq!(result["protocolVersion"], json!("2025-06-18"));
    assert_eq!(result["serverInfo"]["name"], json!("mcp-conduit"));
    assert_eq!(result["capabilities"]["tools"]["list"], json!(true));
    assert_eq!(result["capabilities"]["tools"]["call"], json!(true));
    assert_eq!(result["capabilities"]["resources"]["read"], json!(true));
    assert_eq!(result["capabilities"]["prompts"]["get"], json!(true));
    assert_eq!(result["capabilities"]["models"]["select"], json!(true));
    assert!(result["instructions"].is_string());

    assert_eq!(client.negotiated_version().await.as_deref(), Some("2025-06-18"));
}

#[tokio::test]
async fn requests_before_initialize_are_rejected() {
    let (_server, client, _serve) = connected_pair().await;

    let err = client.ping().await.expect_err("ping must be gated");
    match err {
        ClientError::Rpc { code, .. } => assert_eq!(code, -32002),
        other => panic!("Expected RPC error, got {other:?}"),
    }

    // After the handshake the same call succeeds
    initialise(&client).await;
    assert_eq!(client.ping().await.expect("ping failed"), json!("pong"));
}

#[tokio::test]
async fn sum_numbers_renders_expression() {
    let (_server, client, _serve) = connected_pair().await;
    initialise(&client).await;

    let tools = client.list_tools().await.expect("list_tools failed");
    assert!(tools.iter().any(|t| t.name == "sum_numbers"));

    let result = client
        .call_tool("sum_numbers", json!({ "values": [2, 3, 5] }))
        .await
        .expect("tool call failed");
    assert_eq!(result["sum"], json!(10));
    assert_eq!(result["content"][0]["text"], json!("2 + 3 + 5 = 10"));
}

#[tokio::test]
async fn string_encoded_arguments_are_accepted() {
    let (_server, client, _serve) = connected_pair().await;
    initialise(&client).await;

    let result = client
        .call_tool("sum_numbers", json!("{\"values\": [1, 2, 3]}"))
        .await
        .expect("tool call with string arguments failed");
    assert_eq!(result["sum"], json!(6));
}

#[tokio::test]
async fn unknown_tool_is_method_not_found() {
    let (_server, client, _serve) = connected_pair().await;
    initialise(&client).await;

    let err = client
        .call_tool("does_not_exist", json!({}))
        .await
        .expect_err("unknown tool must fail");
    match err {
        ClientError::Rpc { code, message, .. } => {
            assert_eq!(code, -32601);
            assert!(message.contains("does_not_exist"));
        }
        other => panic!("Expected RPC error, got {other:?}"),
    }
}

#[tokio::test]
async fn resources_are_listed_and_read() {
    let (_server, client, _serve) = connected_pair().await;
    initialise(&client).await;

    let resources = client.list_resources().await.expect("list failed");
    assert_eq!(resources.len(), 2);

    let welcome = client.read_resource("welcome").await.expect("read failed");
    assert!(welcome.as_str().unwrap().contains("Welcome"));

    // The URI form resolves to the same resource
    let by_uri = client
        .read_resource("mcp://demo/resources/welcome")
        .await
        .expect("read by uri failed");
    assert_eq!(welcome, by_uri);

    let err = client
        .read_resource("missing")
        .await
        .expect_err("unknown resource must fail");
    match err {
        ClientError::Rpc { code, message, .. } => {
            assert_eq!(code, -32000);
            assert!(message.contains("missing"));
        }
        other => panic!("Expected RPC error, got {other:?}"),
    }
}

#[tokio::test]
async fn prompts_resolve_with_arguments() {
    let (_server, client, _serve) = connected_pair().await;
    initialise(&client).await;

    let prompts = client.list_prompts().await.expect("list failed");
    assert_eq!(prompts.len(), 2);

    let greeting = client
        .get_prompt("greet", Some(json!({ "name": "Ada" })))
        .await
        .expect("get_prompt failed");
    assert_eq!(greeting["text"], json!("Hello Ada!"));
}

#[tokio::test]
async fn model_selection_updates_metadata() {
    let (_server, client, _serve) = connected_pair().await;
    initialise(&client).await;

    let models = client.list_models().await.expect("list failed");
    assert_eq!(models.len(), 2);

    let model = client.get_model("mock-vision").await.expect("get failed");
    assert_eq!(model["name"], json!("mock-vision"));

    let err = client
        .get_model("imaginary")
        .await
        .expect_err("unknown model must fail");
    match err {
        ClientError::Rpc { code, message, .. } => {
            assert_eq!(code, -32601);
            assert!(message.contains("imaginary"));
        }
        other => panic!("Expected RPC error, got {other:?}"),
    }

    client
        .select_model("mock-vision")
        .await
        .expect("select failed");
    let metadata = client.get_metadata().await.expect("metadata failed");
    assert_eq!(metadata["activeModel"], json!("mock-vision"));

    let entry = client
        .get_metadata_entry("package")
        .await
        .expect("metadata entry failed");
    assert_eq!(entry["key"], json!("package"));
    assert_eq!(entry["value"], json!("mcp-conduit"));
}

#[tokio::test]
async fn shutdown_answers_then_closes() {
    let (_server, client, serve) = connected_pair().await;
    initialise(&client).await;

    let result = client.shutdown().await.expect("shutdown failed");
    assert_eq!(result, json!("ok"));

    // The connection loop exits once the stop signal lands
    serve
        .await
        .expect("serve task panicked")
        .expect("serve loop failed");

    assert!(!client.is_connected().await);
    let err = client.ping().await.expect_err("ping after shutdown must fail");
    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test]
async fn malformed_request_with_id_is_answered_on_the_wire() {
    let server = demo_server();
    let (client_io, server_io) = tokio::io::duplex(4096);
    let (server_rx, server_tx) = tokio::io::split(server_io);
    let (client_rx, mut client_tx) = tokio::io::split(client_io);
    tokio::spawn(async move { server.serve_connection(server_rx, server_tx).await });

    client_tx
        .write_all(b"{\"id\": 1, \"method\": \"x\"}\n")
        .await
        .expect("write failed");

    let mut lines = BufReader::new(client_rx).lines();
    let reply = lines
        .next_line()
        .await
        .expect("read failed")
        .expect("stream closed without reply");
    assert!(reply.contains("-32600"));
    assert!(reply.contains("\"id\":1"));
}

#[tokio::test]
async fn malformed_json_without_id_is_dropped() {
    let server = demo_server();
    let (client_io, server_io) = tokio::io::duplex(4096);
    let (server_rx, server_tx) = tokio::io::split(server_io);
    let (client_rx, mut client_tx) = tokio::io::split(client_io);
    tokio::spawn(async move { server.serve_connection(server_rx, server_tx).await });

    // Garbage, then a valid request: only the valid one is answered
    client_tx
        .write_all(b"{nonsense\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"initialize\",\"params\":{}}\n")
        .await
        .expect("write failed");

    let mut lines = BufReader::new(client_rx).lines();
    let reply = lines
        .next_line()
        .await
        .expect("read failed")
        .expect("stream closed without reply");
    assert!(reply.contains("\"id\":2"));
    assert!(reply.contains("protocolVersion"));
}
