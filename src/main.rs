//! kmcp - Kubernetes port forwarding over MCP
//!
//! ## Modes
//!
//! **stdio** (default): Serves MCP over stdin/stdout for a single AI host.
//! Port forwarding is available; tracing goes to stderr.
//!
//! **http** (`kmcp http`): Serves MCP over Streamable HTTP at `/mcp`. Many
//! clients may connect, so the port-forward tools are disabled.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser as ClapParser, Subcommand};
use rmcp::ServiceExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kmcp::{
    api,
    cluster::KubeClusterClient,
    config::{self, Config},
    mcp::KmcpServer,
    mode::TransportMode,
    portforward::PortForwardManager,
};

/// kmcp - Kubernetes port forwarding over MCP
#[derive(ClapParser, Debug)]
#[command(name = "kmcp", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the TOML config file
    #[arg(long, global = true, env = "KMCP_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace used when a request omits one (overrides the config file)
    #[arg(long, global = true, env = "KMCP_NAMESPACE")]
    namespace: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve MCP over stdin/stdout (the default)
    Stdio,

    /// Serve MCP over Streamable HTTP
    Http {
        /// Address to bind the HTTP server
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mode = match cli.command {
        Some(Commands::Http { .. }) => TransportMode::Http,
        Some(Commands::Stdio) | None => TransportMode::Stdio,
    };
    // stdio mode: tracing must use stderr since stdout is for MCP protocol
    init_tracing(mode);

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let mut config = Config::load_or_default(&config_path)?;
    if let Some(namespace) = cli.namespace {
        config.default_namespace = namespace;
    }
    let settings = config.port_forward_settings()?;

    let client = Arc::new(KubeClusterClient::new(config.port_forward.bind_address));
    let port_forwards = PortForwardManager::new(client, mode, settings);
    let state = api::AppState::new(port_forwards.clone());

    let result = match cli.command {
        Some(Commands::Http { bind }) => run_http(state, bind).await,
        Some(Commands::Stdio) | None => run_stdio(state).await,
    };

    port_forwards.shutdown();
    result
}

fn init_tracing(mode: TransportMode) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "kmcp=info".into()),
    );
    match mode {
        TransportMode::Stdio => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        TransportMode::Http => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

// ── stdio mode ─────────────────────────────────────────────────────

/// Serve MCP on stdin/stdout until the client disconnects or Ctrl+C.
async fn run_stdio(state: api::AppState) -> anyhow::Result<()> {
    tracing::info!("kmcp stdio server starting");

    let service = KmcpServer::new(state)
        .serve(rmcp::transport::stdio())
        .await
        .context("failed to start MCP stdio service")?;

    // Dropping the service on Ctrl+C cancels it.
    tokio::select! {
        result = service.waiting() => {
            let reason = result.context("MCP stdio service failed")?;
            tracing::debug!(?reason, "MCP stdio service stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C");
        }
    }

    tracing::info!("kmcp stdio server exiting");
    Ok(())
}

// ── HTTP mode ──────────────────────────────────────────────────────

async fn run_http(state: api::AppState, bind: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("kmcp http server starting");

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %bind, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received Ctrl+C");
        })
        .await
        .context("HTTP server failed")?;

    tracing::info!("kmcp http server exiting");
    Ok(())
}
