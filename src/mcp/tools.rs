// MCP tool parameter types

use serde::Deserialize;

use crate::portforward::StartRequest;

/// Parameters for the `port_forward` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PortForwardParams {
    #[schemars(description = "Name of the resource to forward to (pod, service, deployment, ...).")]
    pub resource_name: String,

    #[schemars(description = "Kind of the resource, e.g. Pod, Service, Deployment.")]
    pub kind: String,

    #[schemars(description = "Namespace of the resource. Defaults to the server's configured namespace.")]
    pub namespace: Option<String>,

    #[schemars(description = "API version of the resource, e.g. apps/v1. Looked up from the kind if omitted.")]
    pub api_version: Option<String>,

    /// Comma-separated `local[:remote]` pairs.
    #[schemars(description = "Comma-separated port pairs as local[:remote], e.g. '8080:80,9090'. Defaults to 8080:80.")]
    pub ports: Option<String>,
}

impl From<PortForwardParams> for StartRequest {
    fn from(params: PortForwardParams) -> Self {
        Self {
            resource_name: params.resource_name,
            kind: params.kind,
            namespace: params.namespace,
            api_version: params.api_version,
            ports: params.ports,
        }
    }
}

/// Parameters for the `cancel_port_forward` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CancelPortForwardParams {
    #[schemars(description = "Name of the resource whose port forwarding should stop.")]
    pub resource_name: String,

    #[schemars(description = "Namespace of the resource. Defaults to the server's configured namespace.")]
    pub namespace: Option<String>,
}
