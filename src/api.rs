//! HTTP surface for the Streamable HTTP transport.
//!
//! Serves the MCP endpoint under `/mcp` plus a `/health` probe. In this mode
//! the server is shared by many clients, so the port-forward tools answer with
//! an `UnsupportedInMode` error.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::portforward::PortForwardManager;

/// Maximum concurrent MCP sessions allowed via the Streamable HTTP transport.
const MAX_MCP_SESSIONS: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub port_forwards: PortForwardManager,
    /// Counter for active MCP sessions (Streamable HTTP transport).
    pub mcp_session_count: Arc<std::sync::atomic::AtomicUsize>,
}

impl AppState {
    pub fn new(port_forwards: PortForwardManager) -> Self {
        Self {
            port_forwards,
            mcp_session_count: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    transport: &'static str,
    port_forwards: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        transport: state.port_forwards.mode().as_str(),
        port_forwards: state.port_forwards.registry().len(),
    })
}

pub fn router(state: AppState) -> Router {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
    };

    let mcp_state = state.clone();
    let mcp_counter = state.mcp_session_count.clone();
    let mcp_service = StreamableHttpService::new(
        move || {
            let current = mcp_counter.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
            if current >= MAX_MCP_SESSIONS {
                mcp_counter.fetch_sub(1, std::sync::atomic::Ordering::Release);
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "maximum MCP sessions reached",
                ));
            }
            Ok(crate::mcp::KmcpServer::new(mcp_state.clone())
                .with_session_counter(mcp_counter.clone()))
        },
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );

    Router::new()
        .route("/health", get(health))
        .nest_service("/mcp", mcp_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
