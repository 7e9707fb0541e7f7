// ============================
// shopstatus-backend-lib/src/registry.rs
// ============================
//! Connection registry.
//!
//! The registry is the single source of truth for live status connections:
//! - which transport sessions are open and whether they have authenticated
//! - who each authenticated connection belongs to and its role
//! - when each connection last sent a heartbeat or showed user activity
//!
//! Every operation is a short critical section over one lock and never
//! performs I/O or awaits while holding it. Operations on unknown ids are
//! no-ops: close and heartbeat races are expected, not exceptional.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shopstatus_common::{Role, ServerMessage, UserId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::clock::Clock;

/// Opaque identifier assigned when the transport handshake completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Authentication state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Pending,
    Authenticated,
}

/// Why a delivery to a single connection failed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection is closed")]
    Closed,
    #[error("outbound queue is full")]
    Full,
}

/// Sending half of a connection: a bounded outbound queue plus a close signal
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ServerMessage>,
    closed: Arc<Notify>,
}

/// Receiving half, owned by the task driving the socket
#[derive(Debug)]
pub struct ConnectionReceiver {
    pub messages: mpsc::Receiver<ServerMessage>,
    pub closed: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a connected handle/receiver pair with the given queue depth
    pub fn channel(capacity: usize) -> (Self, ConnectionReceiver) {
        let (sender, messages) = mpsc::channel(capacity.max(1));
        let closed = Arc::new(Notify::new());
        (
            Self {
                sender,
                closed: closed.clone(),
            },
            ConnectionReceiver { messages, closed },
        )
    }

    /// Queue a message without waiting; a slow client never blocks the caller
    pub fn deliver(&self, msg: ServerMessage) -> Result<(), DeliveryError> {
        self.sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the socket task to close the transport
    pub fn close(&self) {
        self.closed.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// One live transport session
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub auth_state: AuthState,
    pub user_id: Option<UserId>,
    pub display_name: Option<String>,
    pub role: Role,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    handle: ConnectionHandle,
}

impl Connection {
    /// A freshly handshaken, not yet authenticated connection
    pub fn new(id: ConnectionId, handle: ConnectionHandle, now: DateTime<Utc>) -> Self {
        Self {
            id,
            auth_state: AuthState::Pending,
            user_id: None,
            display_name: None,
            role: Role::Standard,
            connected_at: now,
            last_activity: now,
            last_heartbeat: now,
            handle,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_state == AuthState::Authenticated
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }
}

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    /// Last activity of users whose connections have all closed, kept until
    /// [`ConnectionRegistry::prune_last_seen`] drops it
    last_seen: HashMap<UserId, DateTime<Utc>>,
}

impl Inner {
    fn remember(&mut self, conn: &Connection) {
        if let (AuthState::Authenticated, Some(user_id)) = (conn.auth_state, conn.user_id) {
            let seen = self.last_seen.entry(user_id).or_insert(conn.last_activity);
            if conn.last_activity > *seen {
                *seen = conn.last_activity;
            }
        }
    }

    fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(id)?;
        self.remember(&removed);
        Some(removed)
    }
}

/// Registry of all live status connections
#[derive(Debug)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    /// Current time according to the registry's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Add a connection in `Pending` state
    pub fn register(&self, connection: Connection) {
        self.inner.write().connections.insert(connection.id, connection);
    }

    /// Create and register a pending connection for a transport handle
    pub fn open(&self, handle: ConnectionHandle) -> ConnectionId {
        let id = ConnectionId::generate();
        self.register(Connection::new(id, handle, self.now()));
        id
    }

    /// Promote a connection to `Authenticated`. Returns false for unknown ids.
    pub fn authenticate(
        &self,
        id: ConnectionId,
        user_id: UserId,
        display_name: &str,
        role: Role,
    ) -> bool {
        let now = self.now();
        let mut inner = self.inner.write();
        let Some(conn) = inner.connections.get_mut(&id) else {
            return false;
        };
        conn.auth_state = AuthState::Authenticated;
        conn.user_id = Some(user_id);
        conn.display_name = Some(display_name.to_string());
        conn.role = role;
        conn.last_activity = now;
        conn.last_heartbeat = now;
        true
    }

    /// Stamp the heartbeat time. Returns false for unknown ids.
    pub fn record_heartbeat(&self, id: ConnectionId) -> bool {
        let now = self.now();
        match self.inner.write().connections.get_mut(&id) {
            Some(conn) => {
                conn.last_heartbeat = now;
                true
            },
            None => false,
        }
    }

    /// Stamp the activity time. Returns false for unknown ids.
    pub fn record_activity(&self, id: ConnectionId) -> bool {
        let now = self.now();
        match self.inner.write().connections.get_mut(&id) {
            Some(conn) => {
                conn.last_activity = now;
                true
            },
            None => false,
        }
    }

    /// Remove a connection unconditionally and return it
    pub fn unregister(&self, id: ConnectionId) -> Option<Connection> {
        self.inner.write().remove(&id)
    }

    /// Remove a connection and tell its socket task to close
    pub fn evict(&self, id: ConnectionId) -> Option<Connection> {
        let removed = self.unregister(id)?;
        removed.handle.close();
        Some(removed)
    }

    /// Remove and close a connection only if it never authenticated
    pub fn expire_pending(&self, id: ConnectionId) -> Option<Connection> {
        let removed = {
            let mut inner = self.inner.write();
            match inner.connections.get(&id) {
                Some(conn) if conn.auth_state == AuthState::Pending => inner.remove(&id),
                _ => None,
            }
        }?;
        removed.handle.close();
        Some(removed)
    }

    /// Remove and close every connection whose last heartbeat is older than `stale_after`
    pub fn sweep_stale(&self, stale_after: Duration) -> Vec<Connection> {
        let now = self.now();
        let removed: Vec<Connection> = {
            let mut inner = self.inner.write();
            let stale: Vec<ConnectionId> = inner
                .connections
                .values()
                .filter(|conn| {
                    (now - conn.last_heartbeat)
                        .to_std()
                        .is_ok_and(|elapsed| elapsed > stale_after)
                })
                .map(|conn| conn.id)
                .collect();
            stale.iter().filter_map(|id| inner.remove(id)).collect()
        };
        for conn in &removed {
            conn.handle.close();
        }
        removed
    }

    /// Forget departed users whose last activity is older than `retention`
    pub fn prune_last_seen(&self, retention: Duration) -> usize {
        let now = self.now();
        let mut inner = self.inner.write();
        let before = inner.last_seen.len();
        inner.last_seen.retain(|_, seen| {
            (now - *seen)
                .to_std()
                .map_or(true, |elapsed| elapsed <= retention)
        });
        before - inner.last_seen.len()
    }

    /// Close and drop every connection. Used on shutdown.
    pub fn clear(&self) -> usize {
        let drained: Vec<Connection> = {
            let mut inner = self.inner.write();
            let ids: Vec<ConnectionId> = inner.connections.keys().copied().collect();
            ids.iter().filter_map(|id| inner.remove(id)).collect()
        };
        for conn in &drained {
            conn.handle.close();
        }
        drained.len()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.inner.read().connections.get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.read().connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn authenticated_count(&self) -> usize {
        self.inner
            .read()
            .connections
            .values()
            .filter(|c| c.is_authenticated())
            .count()
    }

    /// Consistent copy of every connection
    pub fn snapshot(&self) -> Vec<Connection> {
        self.inner.read().connections.values().cloned().collect()
    }

    /// Consistent copy of the authenticated connections
    pub fn authenticated(&self) -> Vec<Connection> {
        self.inner
            .read()
            .connections
            .values()
            .filter(|c| c.is_authenticated())
            .cloned()
            .collect()
    }

    /// Latest activity of a user: live connections first, then the frozen
    /// value recorded when their last connection closed
    pub fn last_seen(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        let inner = self.inner.read();
        let live = inner
            .connections
            .values()
            .filter(|c| c.is_authenticated() && c.user_id == Some(user_id))
            .map(|c| c.last_activity)
            .max();
        live.or_else(|| inner.last_seen.get(&user_id).copied())
    }
}
