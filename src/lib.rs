//! mcp-conduit: bidirectional MCP engine over stdio, WebSocket, and HTTP
//!
//! This library provides both halves of a Model Context Protocol (MCP)
//! deployment: a server that exposes registered tools, resources, prompts,
//! and models over JSON-RPC 2.0, and a client that invokes them.
//!
//! # Architecture
//!
//! The engine separates the transport-independent core from the wire:
//!
//! - **Codec**: JSON-RPC 2.0 envelopes with MCP error codes
//! - **Registries**: read-only tool/resource/prompt/model catalogues
//! - **Router**: per-session method dispatch with initialisation gating
//! - **Transports**: newline-framed stdio, WebSocket frames, stateless
//!   HTTP with SSE push channels
//!
//! # Modules
//!
//! - [`config`] — Configuration loading and validation
//! - [`demo`] — Built-in demonstration registry
//! - [`error`] — Error types
//! - [`mcp`] — The protocol engine (server, client, transports)

pub mod config;
pub mod demo;
pub mod error;
pub mod mcp;
