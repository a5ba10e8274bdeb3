use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::PortPair;

/// Registry key: one live session per `(namespace, resource name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub namespace: String,
    pub name: String,
}

impl SessionKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One active (or starting) port-forward.
///
/// Cloning is cheap and shares the cancellation token, so a clone handed out
/// by [`SessionRegistry::lookup`] can still stop the tunnel. No other field
/// changes after construction.
#[derive(Debug, Clone)]
pub struct Session {
    /// Distinguishes successive sessions under the same key.
    pub id: Uuid,
    pub namespace: String,
    pub resource_name: String,
    pub kind: String,
    pub local_ports: Vec<String>,
    pub remote_ports: Vec<String>,
    pub started_at: Instant,
    pub cancelled: CancellationToken,
}

impl Session {
    pub fn new(key: &SessionKey, kind: impl Into<String>, ports: &[PortPair]) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: key.namespace.clone(),
            resource_name: key.name.clone(),
            kind: kind.into(),
            local_ports: ports.iter().map(|p| p.local.to_string()).collect(),
            remote_ports: ports.iter().map(|p| p.remote.to_string()).collect(),
            started_at: Instant::now(),
            cancelled: CancellationToken::new(),
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.namespace.clone(), self.resource_name.clone())
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Shared table of port-forward sessions.
///
/// Every operation takes the single lock for exactly one map operation and
/// never holds it across an await point.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<SessionKey, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session` under its key, cancelling and returning any session
    /// it supersedes.
    pub fn reserve(&self, session: Session) -> Option<Session> {
        let key = session.key();
        let previous = self.inner.lock().insert(key.clone(), session);
        if let Some(ref old) = previous {
            old.cancelled.cancel();
            tracing::info!(session = %key, superseded = %old.id, "port forward superseded");
        }
        previous
    }

    /// Remove the session under `key`, cancelling it. Absent keys are a no-op.
    pub fn remove(&self, key: &SessionKey) -> Option<Session> {
        let removed = self.inner.lock().remove(key);
        if let Some(ref session) = removed {
            session.cancelled.cancel();
        }
        removed
    }

    /// Remove the session under `key` only if it is still session `id`.
    ///
    /// Cleanup paths of a superseded session use this so they never evict
    /// the session that replaced them.
    pub fn remove_if_current(&self, key: &SessionKey, id: Uuid) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            match inner.get(key) {
                Some(session) if session.id == id => inner.remove(key),
                _ => None,
            }
        };
        match removed {
            Some(session) => {
                session.cancelled.cancel();
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, key: &SessionKey) -> Option<Session> {
        self.inner.lock().get(key).cloned()
    }

    /// Point-in-time copy of every session, ordered by key.
    pub fn snapshot(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.inner.lock().values().cloned().collect();
        sessions.sort_by(|a, b| {
            (&a.namespace, &a.resource_name).cmp(&(&b.namespace, &b.resource_name))
        });
        sessions
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and cancel every session. Used on server shutdown.
    pub fn drain(&self) -> usize {
        let drained: Vec<Session> = self.inner.lock().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.cancelled.cancel();
        }
        drained.len()
    }
}
