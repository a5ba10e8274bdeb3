//! Cluster collaborator seam.
//!
//! The port-forward manager never talks to the Kubernetes API directly. It
//! goes through [`ClusterClient`], which performs resource lookups and runs
//! the tunnel body. [`KubeClusterClient`] is the production
//! implementation; tests substitute an in-process fake.

pub mod kubernetes;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::portforward::PortPair;

pub use self::kubernetes::KubeClusterClient;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("failed to connect to cluster: {0}")]
    Connect(#[source] kube::Error),
    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),
    #[error("{kind} {name} has no label selector to pick a pod from")]
    NoSelector { kind: String, name: String },
    #[error("no running pod found for {kind} {name}")]
    NoRunningPod { kind: String, name: String },
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Other(String),
}

/// Everything the tunnel needs to know about its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub namespace: String,
    pub resource_name: String,
    pub kind: String,
    pub api_version: String,
    pub ports: Vec<PortPair>,
}

/// Line-oriented tunnel output.
///
/// Lines are echoed to stderr for whoever operates the process. Until the
/// tunnel is ready they are also kept in a buffer for the caller;
/// [`take_captured`](Self::take_captured) hands that buffer over and ends
/// capturing, so a long-lived tunnel only writes to stderr. stdout is off
/// limits: the stdio transport owns it.
#[derive(Debug, Clone)]
pub struct TunnelOutput {
    captured: Arc<Mutex<Option<Vec<String>>>>,
}

impl Default for TunnelOutput {
    fn default() -> Self {
        Self {
            captured: Arc::new(Mutex::new(Some(Vec::new()))),
        }
    }
}

impl TunnelOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self, line: impl Into<String>) {
        let line = line.into();
        eprintln!("{line}");
        if let Some(buffer) = self.captured.lock().as_mut() {
            buffer.push(line);
        }
    }

    /// Everything written so far. Later lines go to stderr only.
    pub fn take_captured(&self) -> Vec<String> {
        self.captured.lock().take().unwrap_or_default()
    }
}

#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    /// Fetch a single object as JSON. Used to probe whether a resource is
    /// served under a guessed API version.
    async fn fetch_resource(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
        api_version: &str,
    ) -> Result<serde_json::Value, ClusterError>;

    /// Run a tunnel until `stop` fires.
    ///
    /// Implementations send on `ready` at most once, after every local
    /// listener is bound. Returning before `ready` was sent means the tunnel
    /// failed to start; returning `Ok(())` after `stop` fired is a clean exit.
    async fn forward(
        &self,
        request: ForwardRequest,
        stop: CancellationToken,
        ready: oneshot::Sender<()>,
        output: TunnelOutput,
    ) -> Result<(), ClusterError>;
}
