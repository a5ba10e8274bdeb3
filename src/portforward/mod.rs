//! Port-forward session management.
//!
//! [`PortForwardManager`] is the entry point for the three port-forward
//! tools. It owns the [`SessionRegistry`] and the cluster collaborator, and
//! applies the transport [mode gate](crate::mode) before touching either.

pub mod format;
pub mod orchestrator;
pub mod ports;
pub mod registry;
pub mod version;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterClient, ClusterError, ForwardRequest};
use crate::mode::TransportMode;

pub use self::ports::{normalize_ports, parse_ports, PortPair};
pub use self::registry::{Session, SessionKey, SessionRegistry};

#[derive(Debug, thiserror::Error)]
pub enum PortForwardError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid port specification {segment:?}: {reason}")]
    InvalidPortSpec { segment: String, reason: String },
    #[error("failed to resolve API version for {kind} {name}: {source}")]
    VersionResolutionFailed {
        kind: String,
        name: String,
        #[source]
        source: ClusterError,
    },
    #[error("port forwarding is only available over the stdio transport (server is running over {0})")]
    UnsupportedInMode(TransportMode),
    #[error("no active port forwarding found for {0}")]
    NotFound(SessionKey),
    #[error("port forwarding failed for {key}: {reason}")]
    TunnelFailure { key: SessionKey, reason: String },
    #[error("port forwarding for {0} was cancelled before it became ready")]
    Cancelled(SessionKey),
}

/// Defaults applied to requests that leave fields out.
#[derive(Debug, Clone)]
pub struct PortForwardSettings {
    pub default_namespace: String,
    pub default_ports: PortPair,
}

impl Default for PortForwardSettings {
    fn default() -> Self {
        Self {
            default_namespace: "default".to_string(),
            default_ports: PortPair::DEFAULT,
        }
    }
}

/// Arguments of a create request, before validation.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub resource_name: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub api_version: Option<String>,
    pub ports: Option<String>,
}

#[derive(Clone)]
pub struct PortForwardManager {
    registry: SessionRegistry,
    client: Arc<dyn ClusterClient>,
    mode: TransportMode,
    settings: PortForwardSettings,
}

impl PortForwardManager {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        mode: TransportMode,
        settings: PortForwardSettings,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            client,
            mode,
            settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    fn check_mode(&self) -> Result<(), PortForwardError> {
        if self.mode.is_single_client() {
            Ok(())
        } else {
            Err(PortForwardError::UnsupportedInMode(self.mode))
        }
    }

    fn namespace_or_default(&self, namespace: Option<&str>) -> String {
        match namespace.map(str::trim) {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => self.settings.default_namespace.clone(),
        }
    }

    /// Start forwarding and wait until the tunnel is ready.
    ///
    /// Returns the success text for the caller. `caller` is the request's
    /// cancellation token; there is no other timeout.
    pub async fn start(
        &self,
        request: StartRequest,
        caller: CancellationToken,
    ) -> Result<String, PortForwardError> {
        self.check_mode()?;

        let resource_name = request.resource_name.trim();
        if resource_name.is_empty() {
            return Err(PortForwardError::Validation("resource_name is required".to_string()));
        }
        let kind = request.kind.trim();
        if kind.is_empty() {
            return Err(PortForwardError::Validation("kind is required".to_string()));
        }
        let namespace = self.namespace_or_default(request.namespace.as_deref());

        let api_version = match request.api_version.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => {
                version::resolve_api_version(self.client.as_ref(), &namespace, resource_name, kind)
                    .await?
            }
        };
        let ports = parse_ports(request.ports.as_deref(), self.settings.default_ports)?;

        let forward = ForwardRequest {
            namespace,
            resource_name: resource_name.to_string(),
            kind: kind.to_string(),
            api_version,
            ports,
        };
        let started =
            orchestrator::run_session(&self.registry, self.client.clone(), forward, caller).await?;

        let pairs: Vec<String> = started
            .session
            .local_ports
            .iter()
            .zip(&started.session.remote_ports)
            .map(|(local, remote)| format!("{local}:{remote}"))
            .collect();
        let mut text = format!(
            "Port forwarding started successfully for {}\nForwarded ports: {}",
            started.session.key(),
            pairs.join(", ")
        );
        for line in &started.output {
            text.push('\n');
            text.push_str(line);
        }
        Ok(text)
    }

    /// Stop the session for `namespace/resource_name`.
    pub fn cancel(
        &self,
        namespace: Option<&str>,
        resource_name: &str,
    ) -> Result<String, PortForwardError> {
        self.check_mode()?;

        let resource_name = resource_name.trim();
        if resource_name.is_empty() {
            return Err(PortForwardError::Validation("resource_name is required".to_string()));
        }
        let key = SessionKey::new(self.namespace_or_default(namespace), resource_name);
        match self.registry.remove(&key) {
            Some(session) => {
                tracing::info!(session = %key, session_id = %session.id, "port forward cancelled");
                Ok(format!("Port forwarding canceled for {key}"))
            }
            None => Err(PortForwardError::NotFound(key)),
        }
    }

    /// Render every active session as a table.
    pub fn list(&self) -> Result<String, PortForwardError> {
        self.check_mode()?;
        Ok(format::render_sessions(&self.registry.snapshot()))
    }

    /// Stop every session. Called on server shutdown.
    pub fn shutdown(&self) {
        let stopped = self.registry.drain();
        if stopped > 0 {
            tracing::info!(sessions = stopped, "stopped port forwards on shutdown");
        }
    }
}
