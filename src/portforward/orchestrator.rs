// Drives one port-forward session from reservation to teardown.
//
// States: Starting -> Active -> {Cancelled | Failed | CallerCancelled}.
// The initiating call only waits for the first of ready / tunnel exit /
// caller cancellation; the tunnel itself keeps running after Active and a
// completion watcher clears the registry entry when it finally exits.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cluster::{ClusterClient, ClusterError, ForwardRequest, TunnelOutput};

use super::registry::{Session, SessionKey, SessionRegistry};
use super::PortForwardError;

/// A session that reached the Active state.
#[derive(Debug, Clone)]
pub struct Started {
    pub session: Session,
    /// Tunnel output captured up to readiness.
    pub output: Vec<String>,
}

type TunnelHandle = JoinHandle<Result<(), ClusterError>>;

/// Reserve the key, start the tunnel and wait until it is ready, fails, or
/// the caller gives up.
///
/// Every error path removes the registry entry (if it is still this
/// session's) before returning. Dropping the future before it resolves does
/// the same and stops the tunnel.
pub async fn run_session(
    registry: &SessionRegistry,
    client: Arc<dyn ClusterClient>,
    request: ForwardRequest,
    caller: CancellationToken,
) -> Result<Started, PortForwardError> {
    let key = SessionKey::new(request.namespace.clone(), request.resource_name.clone());
    let session = Session::new(&key, request.kind.clone(), &request.ports);
    let id = session.id;
    let stop = session.cancelled.clone();
    registry.reserve(session.clone());
    tracing::info!(session = %key, session_id = %id, kind = %request.kind, "port forward starting");

    // Until the session is Active or handed to a watcher, dropping this
    // future must not leave the entry or the tunnel behind.
    let mut guard = StartGuard {
        registry,
        key: &key,
        id,
        stop: &stop,
        armed: true,
    };

    let (ready_tx, mut ready_rx) = oneshot::channel();
    let output = TunnelOutput::new();
    let mut tunnel: TunnelHandle = {
        let stop = stop.clone();
        let output = output.clone();
        tokio::spawn(async move { client.forward(request, stop, ready_tx, output).await })
    };

    let result = tokio::select! {
        biased;

        ready = &mut ready_rx => match ready {
            Ok(()) => {
                tracing::info!(session = %key, session_id = %id, "port forward active");
                watch_completion(registry.clone(), key.clone(), id, tunnel);
                Ok(Started { session, output: output.take_captured() })
            }
            // The sender was dropped, so the tunnel is finishing without
            // ever becoming ready. The caller may still give up first.
            Err(_) => tokio::select! {
                biased;

                exit = &mut tunnel => Err(start_failure(registry, &key, id, &stop, exit)),
                _ = caller.cancelled() => Err(caller_cancelled(registry, &key, id, &stop, tunnel)),
            },
        },

        exit = &mut tunnel => Err(start_failure(registry, &key, id, &stop, exit)),

        _ = caller.cancelled() => Err(caller_cancelled(registry, &key, id, &stop, tunnel)),
    };

    // Every branch above has either reached Active or cleaned up already.
    guard.armed = false;
    result
}

/// Cleans up a session whose start was abandoned mid-flight.
struct StartGuard<'a> {
    registry: &'a SessionRegistry,
    key: &'a SessionKey,
    id: Uuid,
    stop: &'a CancellationToken,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Stopping the token ends the detached tunnel task.
        self.stop.cancel();
        if self.registry.remove_if_current(self.key, self.id) {
            tracing::info!(session = %self.key, session_id = %self.id, "port forward start abandoned");
        }
    }
}

fn caller_cancelled(
    registry: &SessionRegistry,
    key: &SessionKey,
    id: Uuid,
    stop: &CancellationToken,
    tunnel: TunnelHandle,
) -> PortForwardError {
    registry.remove_if_current(key, id);
    stop.cancel();
    tracing::info!(session = %key, session_id = %id, "caller cancelled before port forward was ready");
    watch_completion(registry.clone(), key.clone(), id, tunnel);
    PortForwardError::Cancelled(key.clone())
}

/// Classify a tunnel that exited before readiness and clean up after it.
fn start_failure(
    registry: &SessionRegistry,
    key: &SessionKey,
    id: Uuid,
    stop: &CancellationToken,
    exit: Result<Result<(), ClusterError>, tokio::task::JoinError>,
) -> PortForwardError {
    // Read before cleanup: removing the entry cancels the token itself.
    let superseded = stop.is_cancelled();
    registry.remove_if_current(key, id);

    let reason = match exit {
        Err(e) => format!("tunnel task failed: {e}"),
        Ok(Err(e)) => e.to_string(),
        Ok(Ok(())) if superseded => {
            tracing::info!(session = %key, session_id = %id, "port forward stopped before it was ready");
            return PortForwardError::Cancelled(key.clone());
        }
        Ok(Ok(())) => "tunnel exited before it was ready".to_string(),
    };
    tracing::warn!(session = %key, session_id = %id, error = %reason, "port forward failed");
    PortForwardError::TunnelFailure {
        key: key.clone(),
        reason,
    }
}

/// Remove the session once its tunnel task ends, whatever ended it.
fn watch_completion(registry: SessionRegistry, key: SessionKey, id: Uuid, tunnel: TunnelHandle) {
    tokio::spawn(async move {
        let exit = tunnel.await;
        let removed = registry.remove_if_current(&key, id);
        match exit {
            Ok(Ok(())) => {
                tracing::info!(session = %key, session_id = %id, removed, "port forward stopped")
            }
            Ok(Err(e)) => {
                tracing::warn!(session = %key, session_id = %id, removed, error = %e, "port forward terminated")
            }
            Err(e) => {
                tracing::error!(session = %key, session_id = %id, removed, error = %e, "port forward task panicked")
            }
        }
    });
}
