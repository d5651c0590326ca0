//! mcp-conduit: MCP server over stdio, WebSocket, and HTTP transports.
//!
//! Launches the demonstration registry on the configured transports. All
//! logging goes to stderr so the stdio transport's protocol stream stays
//! clean.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use mcp_conduit::config;
use mcp_conduit::demo::demo_registry;
use mcp_conduit::mcp::server::{McpServer, ServerConfig, ServerError, ServerTransport};

/// MCP server exposing tools, resources, prompts, and models over
/// JSON-RPC 2.0.
///
/// Speaks newline-delimited JSON on stdio, one message per WebSocket frame,
/// and stateless HTTP with SSE push channels, all concurrently.
#[derive(Parser, Debug)]
#[command(name = "mcp-conduit")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// TCP port for the HTTP listener (overrides configuration)
    #[arg(short, long)]
    port: Option<u16>,

    /// URL path serving the protocol (overrides configuration)
    #[arg(long)]
    path: Option<String>,

    /// Transports to bind, comma separated: stdio, websocket, http
    #[arg(short, long, value_delimiter = ',', value_parser = parse_transport)]
    transports: Option<Vec<ServerTransport>>,

    /// Skip registering the built-in demonstration tools
    #[arg(long)]
    no_default_tools: bool,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

fn parse_transport(value: &str) -> Result<ServerTransport, String> {
    match value.trim().to_lowercase().as_str() {
        "stdio" => Ok(ServerTransport::Stdio),
        "websocket" | "ws" => Ok(ServerTransport::Websocket),
        "http" => Ok(ServerTransport::Http),
        other => Err(format!(
            "unknown transport '{other}' (expected stdio, websocket, or http)"
        )),
    }
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Runs until interrupted, terminated, or shut down over the protocol.
async fn run(server: McpServer) -> Result<(), ServerError> {
    server.start().await?;
    let mut shutdown = server.shutdown_signal();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
        }
        () = terminate_signal() => {
            info!("Termination signal received, shutting down");
        }
        _ = shutdown.changed() => {
            // A client asked us to stop over the protocol
        }
    }

    server.stop().await;
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    // CLI flags override the configuration file
    let server_config = ServerConfig {
        port: args.port.unwrap_or(cfg.server.port),
        path: args.path.unwrap_or(cfg.server.path),
        transports: args.transports.unwrap_or(cfg.server.transports),
    };
    let include_default_tools = cfg.server.include_default_tools && !args.no_default_tools;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = server_config.port,
        path = %server_config.path,
        transports = ?server_config.transports,
        "Starting mcp-conduit server"
    );

    let registry = demo_registry(&server_config.transports, include_default_tools);
    let server = McpServer::new(registry, server_config);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(server)) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
