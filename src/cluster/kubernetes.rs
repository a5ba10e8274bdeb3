// Kubernetes-backed cluster collaborator.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ApiResource, DynamicObject, ListParams};
use kube::core::GroupVersionKind;
use kube::Client;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, OnceCell};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{ClusterClient, ClusterError, ForwardRequest, TunnelOutput};

/// Cluster client built from the ambient kubeconfig.
///
/// The underlying [`Client`] is created on first use so the server can start
/// (and answer `list`/`cancel`) on a machine with no cluster configured.
pub struct KubeClusterClient {
    client: OnceCell<Client>,
    bind_address: IpAddr,
}

impl KubeClusterClient {
    pub fn new(bind_address: IpAddr) -> Self {
        Self {
            client: OnceCell::new(),
            bind_address,
        }
    }

    async fn client(&self) -> Result<Client, ClusterError> {
        self.client
            .get_or_try_init(|| async { Client::try_default().await.map_err(ClusterError::Connect) })
            .await
            .cloned()
    }

    /// Resolve the forward target to a concrete pod name.
    ///
    /// Pods are used as-is. Anything else is fetched and its label selector
    /// (`spec.selector.matchLabels` for workloads, `spec.selector` for
    /// services) picks the first running pod.
    async fn resolve_pod(&self, client: &Client, request: &ForwardRequest) -> Result<String, ClusterError> {
        if request.kind.eq_ignore_ascii_case("pod") {
            return Ok(request.resource_name.clone());
        }

        let object = self
            .fetch_resource(
                &request.namespace,
                &request.resource_name,
                &request.kind,
                &request.api_version,
            )
            .await?;
        let selector = label_selector(&object).ok_or_else(|| ClusterError::NoSelector {
            kind: request.kind.clone(),
            name: request.resource_name.clone(),
        })?;

        let pods: Api<Pod> = pods_api(client.clone(), &request.namespace);
        let list = pods.list(&ListParams::default().labels(&selector)).await?;
        list.items
            .into_iter()
            .find(|pod| {
                pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
            })
            .and_then(|pod| pod.metadata.name)
            .ok_or_else(|| ClusterError::NoRunningPod {
                kind: request.kind.clone(),
                name: request.resource_name.clone(),
            })
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn fetch_resource(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
        api_version: &str,
    ) -> Result<serde_json::Value, ClusterError> {
        let client = self.client().await?;
        let (group, version) = split_api_version(api_version);
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = if namespace.is_empty() {
            Api::default_namespaced_with(client, &resource)
        } else {
            Api::namespaced_with(client, namespace, &resource)
        };
        let object = api.get(name).await?;
        serde_json::to_value(&object).map_err(|e| ClusterError::Other(e.to_string()))
    }

    async fn forward(
        &self,
        request: ForwardRequest,
        stop: CancellationToken,
        ready: oneshot::Sender<()>,
        output: TunnelOutput,
    ) -> Result<(), ClusterError> {
        let client = self.client().await?;
        let pod = self.resolve_pod(&client, &request).await?;
        let pods: Api<Pod> = pods_api(client, &request.namespace);

        let mut listeners = Vec::with_capacity(request.ports.len());
        for pair in &request.ports {
            let addr = SocketAddr::new(self.bind_address, pair.local);
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| ClusterError::Bind { addr, source })?;
            output.line(format!("Forwarding from {addr} -> {}", pair.remote));
            listeners.push((listener, pair.local, pair.remote));
        }
        let _ = ready.send(());
        tracing::debug!(pod = %pod, namespace = %request.namespace, "tunnel listeners bound");

        let mut accept_loops = JoinSet::new();
        for (listener, local, remote) in listeners {
            accept_loops.spawn(accept_loop(
                listener,
                pods.clone(),
                pod.clone(),
                local,
                remote,
                stop.clone(),
                output.clone(),
            ));
        }

        loop {
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                joined = accept_loops.join_next() => match joined {
                    Some(Ok(Ok(()))) => continue,
                    Some(Ok(Err(e))) => return Err(e),
                    Some(Err(e)) => return Err(ClusterError::Other(format!("listener task failed: {e}"))),
                    None => return Ok(()),
                },
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    pods: Api<Pod>,
    pod: String,
    local: u16,
    remote: u16,
    stop: CancellationToken,
    output: TunnelOutput,
) -> Result<(), ClusterError> {
    loop {
        let (conn, peer) = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted
                .map_err(|e| ClusterError::Other(format!("accept on port {local} failed: {e}")))?,
        };
        output.line(format!("Handling connection for {local}"));

        let pods = pods.clone();
        let pod = pod.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                result = bridge(pods, &pod, remote, conn) => {
                    if let Err(e) = result {
                        tracing::warn!(%peer, pod = %pod, remote, error = %e, "forwarded connection failed");
                    }
                }
            }
        });
    }
}

/// Copy bytes between one accepted connection and the pod's port.
async fn bridge(pods: Api<Pod>, pod: &str, remote: u16, mut conn: TcpStream) -> Result<(), ClusterError> {
    let mut forwarder = pods.portforward(pod, &[remote]).await?;
    let mut upstream = forwarder
        .take_stream(remote)
        .ok_or_else(|| ClusterError::Other(format!("port {remote} not available on pod {pod}")))?;
    tokio::io::copy_bidirectional(&mut conn, &mut upstream)
        .await
        .map_err(|e| ClusterError::Other(format!("copy failed: {e}")))?;
    drop(upstream);
    forwarder
        .join()
        .await
        .map_err(|e| ClusterError::Other(format!("port forward closed with error: {e}")))
}

fn pods_api(client: Client, namespace: &str) -> Api<Pod> {
    if namespace.is_empty() {
        Api::default_namespaced(client)
    } else {
        Api::namespaced(client, namespace)
    }
}

/// Split `group/version` (or a bare core `version`) into its parts.
fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Build a `k=v,k=v` selector from an object's `spec.selector`.
fn label_selector(object: &serde_json::Value) -> Option<String> {
    let selector = object.pointer("/spec/selector")?;
    let labels = selector.get("matchLabels").unwrap_or(selector).as_object()?;
    let mut pairs: Vec<String> = labels
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|v| format!("{k}={v}")))
        .collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort();
    Some(pairs.join(","))
}
