#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kmcp::cluster::{ClusterClient, ClusterError, ForwardRequest, TunnelOutput};
use kmcp::mode::TransportMode;
use kmcp::portforward::{PortForwardManager, PortForwardSettings, StartRequest};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// How a fake tunnel behaves once started.
#[derive(Debug, Clone)]
pub enum Tunnel {
    /// Become ready, then run until stopped.
    Ready,
    /// Fail before becoming ready.
    Fail(String),
    /// Never become ready; run until stopped.
    Stall,
    /// Become ready, then exit on its own after the delay.
    ReadyThenExit(Duration),
    /// Drop the ready sender without sending, then run until stopped.
    DropReady,
}

/// In-process stand-in for the cluster.
///
/// Tunnels follow `script` in call order, then `default`. `live` counts
/// tunnel bodies that have started and not yet returned.
pub struct FakeCluster {
    pub default: Tunnel,
    pub script: Mutex<VecDeque<Tunnel>>,
    pub missing: HashSet<String>,
    pub lookups: Mutex<Vec<(String, String, String)>>,
    pub forwards: Mutex<Vec<ForwardRequest>>,
    pub live: AtomicUsize,
}

impl FakeCluster {
    pub fn new(default: Tunnel) -> Arc<Self> {
        Arc::new(Self::with(default, Vec::new(), &[]))
    }

    pub fn scripted(script: Vec<Tunnel>, default: Tunnel) -> Arc<Self> {
        Arc::new(Self::with(default, script, &[]))
    }

    pub fn with_missing(default: Tunnel, missing: &[&str]) -> Arc<Self> {
        Arc::new(Self::with(default, Vec::new(), missing))
    }

    fn with(default: Tunnel, script: Vec<Tunnel>, missing: &[&str]) -> Self {
        Self {
            default,
            script: Mutex::new(script.into()),
            missing: missing.iter().map(|s| s.to_string()).collect(),
            lookups: Mutex::new(Vec::new()),
            forwards: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn next_tunnel(&self) -> Tunnel {
        self.script.lock().pop_front().unwrap_or_else(|| self.default.clone())
    }
}

/// Decrements the live-tunnel count however the tunnel body ends.
struct LiveGuard<'a>(&'a AtomicUsize);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn fetch_resource(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
        api_version: &str,
    ) -> Result<serde_json::Value, ClusterError> {
        self.lookups.lock().push((
            format!("{namespace}/{name}"),
            kind.to_string(),
            api_version.to_string(),
        ));
        if self.missing.contains(name) {
            return Err(ClusterError::Other(format!("{kind} {name} not found")));
        }
        Ok(serde_json::json!({"metadata": {"name": name}}))
    }

    async fn forward(
        &self,
        request: ForwardRequest,
        stop: CancellationToken,
        ready: oneshot::Sender<()>,
        output: TunnelOutput,
    ) -> Result<(), ClusterError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        let _guard = LiveGuard(&self.live);
        self.forwards.lock().push(request.clone());

        match self.next_tunnel() {
            Tunnel::Ready => {
                announce(&request, &output);
                let _ = ready.send(());
                stop.cancelled().await;
                Ok(())
            }
            Tunnel::Fail(reason) => Err(ClusterError::Other(reason)),
            Tunnel::Stall => {
                stop.cancelled().await;
                Ok(())
            }
            Tunnel::DropReady => {
                drop(ready);
                stop.cancelled().await;
                Ok(())
            }
            Tunnel::ReadyThenExit(after) => {
                announce(&request, &output);
                let _ = ready.send(());
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = tokio::time::sleep(after) => {}
                }
                Ok(())
            }
        }
    }
}

fn announce(request: &ForwardRequest, output: &TunnelOutput) {
    for pair in &request.ports {
        output.line(format!("Forwarding from 127.0.0.1:{} -> {}", pair.local, pair.remote));
    }
}

pub fn manager(cluster: Arc<FakeCluster>, mode: TransportMode) -> PortForwardManager {
    PortForwardManager::new(cluster, mode, PortForwardSettings::default())
}

pub fn stdio_manager(cluster: Arc<FakeCluster>) -> PortForwardManager {
    manager(cluster, TransportMode::Stdio)
}

pub fn pod_request(namespace: &str, name: &str, ports: &str) -> StartRequest {
    StartRequest {
        resource_name: name.to_string(),
        kind: "Pod".to_string(),
        namespace: Some(namespace.to_string()),
        api_version: None,
        ports: Some(ports.to_string()),
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
