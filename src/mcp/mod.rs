pub mod tools;

use std::sync::Arc;

use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    service::RequestContext,
    tool, tool_handler, tool_router, RoleServer, ServerHandler,
};

use crate::api::AppState;
use crate::portforward::PortForwardError;

use tools::{CancelPortForwardParams, PortForwardParams};

/// Report a domain failure as a tool-level error result.
///
/// Port-forward failures are answers, not protocol faults, so they travel as
/// `isError: true` text content rather than JSON-RPC errors.
fn tool_error(err: PortForwardError) -> CallToolResult {
    CallToolResult::error(vec![Content::text(err.to_string())])
}

fn tool_text(text: String) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text)])
}

// ── MCP server ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct KmcpServer {
    state: AppState,
    tool_router: ToolRouter<KmcpServer>,
    /// Shared counter for active MCP sessions. Decremented on Drop.
    session_counter: Option<Arc<std::sync::atomic::AtomicUsize>>,
}

impl KmcpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
            session_counter: None,
        }
    }

    /// Attach a shared session counter that is decremented when this server is dropped.
    pub fn with_session_counter(mut self, counter: Arc<std::sync::atomic::AtomicUsize>) -> Self {
        self.session_counter = Some(counter);
        self
    }
}

impl Drop for KmcpServer {
    fn drop(&mut self) {
        if let Some(ref counter) = self.session_counter {
            counter.fetch_sub(1, std::sync::atomic::Ordering::Release);
        }
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for KmcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "kmcp".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Kubernetes port forwarding for AI agents: start, list and stop \
                     long-lived tunnels to cluster resources."
                        .to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Use port_forward to open local ports to a pod, service or workload; it returns \
                 once the listeners are ready and the tunnel keeps running in the background. \
                 list_port_forwards shows active tunnels and cancel_port_forward stops one. \
                 A second port_forward for the same namespace/resource replaces the first. \
                 Port forwarding is only available when kmcp runs over stdio."
                    .to_string(),
            ),
        }
    }
}

#[tool_router]
impl KmcpServer {
    /// Start forwarding local ports to a cluster resource.
    #[tool(description = "Forward local ports to a Kubernetes resource (Pod, Service, Deployment, StatefulSet, ...). Returns once the local listeners are ready; the tunnel keeps running until cancelled. 'ports' is a comma-separated list of local[:remote] pairs and defaults to 8080:80. Starting a forward for a resource that already has one replaces it.")]
    async fn port_forward(
        &self,
        Parameters(params): Parameters<PortForwardParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = self
            .state
            .port_forwards
            .start(params.into(), context.ct.clone())
            .await;
        Ok(match result {
            Ok(text) => tool_text(text),
            Err(e) => tool_error(e),
        })
    }

    /// Stop an active port forward.
    #[tool(description = "Stop the active port forwarding for a resource, identified by namespace and resource name.")]
    async fn cancel_port_forward(
        &self,
        Parameters(params): Parameters<CancelPortForwardParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = self
            .state
            .port_forwards
            .cancel(params.namespace.as_deref(), &params.resource_name);
        Ok(match result {
            Ok(text) => tool_text(text),
            Err(e) => tool_error(e),
        })
    }

    /// List active port forwards.
    #[tool(description = "List active port forwarding sessions with their namespace, resource, kind, local and remote ports, and age.")]
    async fn list_port_forwards(&self) -> Result<CallToolResult, ErrorData> {
        Ok(match self.state.port_forwards.list() {
            Ok(text) => tool_text(text),
            Err(e) => tool_error(e),
        })
    }
}
