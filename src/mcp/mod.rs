//! Model Context Protocol (MCP) engine: server and client halves.
//!
//! This module implements a bidirectional JSON-RPC 2.0 engine for the MCP
//! lifecycle — capability negotiation, tool invocation, resource and prompt
//! resolution, model selection, and metadata queries — over three
//! transports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          McpServer                           │
//! │                                                              │
//! │   ┌───────────┐  ┌───────────┐  ┌───────────┐                │
//! │   │   stdio   │  │ WebSocket │  │ HTTP+SSE  │   transports   │
//! │   └─────┬─────┘  └─────┬─────┘  └─────┬─────┘                │
//! │         └───────────── ┼──────────────┘                      │
//! │                        ▼                                     │
//! │   ┌──────────────────────────────────────────┐               │
//! │   │        method router (per session)       │               │
//! │   └────────────────────┬─────────────────────┘               │
//! │                        ▼                                     │
//! │   ┌──────────────────────────────────────────┐               │
//! │   │  ServerRegistry: tools/resources/prompts │               │
//! │   │         /models/metadata handlers        │               │
//! │   └──────────────────────────────────────────┘               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`client::McpClient`] is the mirror image: it speaks the same three
//! transports and correlates responses to callers by request id.
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2025-06-18.

pub mod client;
pub mod framing;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use client::{ClientConfig, ClientError, McpClient, StdioOptions, ToolInfo, TransportKind};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use registry::{HandlerError, ServerRegistry, ToolDefinition, ToolRegistration};
pub use server::{McpServer, ServerConfig, ServerTransport};
