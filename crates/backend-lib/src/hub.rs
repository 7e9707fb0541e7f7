// ============================
// shopstatus-backend-lib/src/hub.rs
// ============================
//! Status hub.
//!
//! Owns the connection registry and connects it to the presence tracker and
//! the event broadcaster. Every registry change that affects presence
//! (authenticate, heartbeat, activity, close, eviction, sweep) is followed by
//! a full `status_update` to all authenticated connections.
//!
//! Business code emits events through [`StatusHub::publish`]; it is a plain
//! synchronous call that never waits on a client.

use metrics::{counter, gauge};
use parking_lot::Mutex;
use shopstatus_common::{ClientMessage, OnlineUser, Role, ServerMessage, UserId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::broadcaster::{BroadcastEvent, DeliveryReport, EventBroadcaster};
use crate::clock::{Clock, SystemClock};
use crate::config::{PresenceSettings, Settings};
use crate::error::AppError;
use crate::metrics::{
    PRESENCE_BROADCAST, PRESENCE_ONLINE_USERS, SWEEP_REMOVED, WS_AUTHENTICATED,
    WS_PROTOCOL_ERROR,
};
use crate::presence::PresenceTracker;
use crate::registry::{Connection, ConnectionHandle, ConnectionId, ConnectionReceiver, ConnectionRegistry};
use crate::validation;

/// Server-side entry point for the status channel
#[derive(Debug)]
pub struct StatusHub {
    registry: Arc<ConnectionRegistry>,
    tracker: PresenceTracker,
    broadcaster: EventBroadcaster,
    presence: PresenceSettings,
    queue_capacity: usize,
    /// Serializes presence snapshots so a stale set is never queued after a newer one
    presence_lock: Mutex<()>,
}

impl StatusHub {
    pub fn new(settings: &Settings, clock: Arc<dyn Clock>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(clock));
        Self {
            tracker: PresenceTracker::new(settings.presence.active_window()),
            broadcaster: EventBroadcaster::new(registry.clone()),
            registry,
            presence: settings.presence.clone(),
            queue_capacity: settings.broadcast.queue_capacity,
            presence_lock: Mutex::new(()),
        }
    }

    pub fn with_system_clock(settings: &Settings) -> Self {
        Self::new(settings, Arc::new(SystemClock))
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    pub fn presence_settings(&self) -> &PresenceSettings {
        &self.presence
    }

    /// Register a new transport session in `Pending` state
    pub fn connect(&self) -> (ConnectionId, ConnectionReceiver) {
        let (handle, receiver) = ConnectionHandle::channel(self.queue_capacity);
        let id = self.registry.open(handle);
        debug!(connection = %id, "connection registered");
        (id, receiver)
    }

    pub fn is_authenticated(&self, id: ConnectionId) -> bool {
        self.registry
            .get(id)
            .is_some_and(|conn| conn.is_authenticated())
    }

    /// Route one parsed client message
    pub fn handle_message(&self, id: ConnectionId, msg: ClientMessage) -> Result<(), AppError> {
        if let Err(e) = validation::validate_client_message(&msg) {
            counter!(WS_PROTOCOL_ERROR).increment(1);
            return Err(e.into());
        }

        match msg {
            ClientMessage::Auth {
                user_id,
                username,
                role,
            } => {
                self.authenticate(id, user_id, username.trim(), role);
            },
            other if !self.is_authenticated(id) => {
                debug!(connection = %id, message = ?other, "ignoring message before auth");
            },
            ClientMessage::Heartbeat { user_id } => {
                self.warn_on_identity_mismatch(id, user_id);
                self.heartbeat(id);
            },
            ClientMessage::Activity { user_id } => {
                self.warn_on_identity_mismatch(id, user_id);
                self.activity(id);
            },
            ClientMessage::RequestStatus => {
                self.request_status(id);
            },
        }
        Ok(())
    }

    /// Promote a connection, acknowledge it and broadcast presence.
    /// Unknown ids are ignored.
    #[instrument(skip(self, username))]
    pub fn authenticate(&self, id: ConnectionId, user_id: UserId, username: &str, role: Role) -> bool {
        {
            // no snapshot may reach the connection ahead of its ack
            let _guard = self.presence_lock.lock();
            if !self.registry.authenticate(id, user_id, username, role) {
                debug!("auth for unknown connection ignored");
                return false;
            }
            self.broadcaster.send_to(id, ServerMessage::AuthSuccess);
        }
        info!(user_id, %role, "connection authenticated");
        gauge!(WS_AUTHENTICATED).set(self.registry.authenticated_count() as f64);

        self.broadcast_presence();
        true
    }

    /// Record a heartbeat, acknowledge it and broadcast presence
    pub fn heartbeat(&self, id: ConnectionId) -> bool {
        if !self.registry.record_heartbeat(id) {
            return false;
        }
        self.broadcaster.send_to(id, ServerMessage::HeartbeatAck);
        self.broadcast_presence();
        true
    }

    /// Record user activity and broadcast presence
    pub fn activity(&self, id: ConnectionId) -> bool {
        if !self.registry.record_activity(id) {
            return false;
        }
        self.broadcast_presence();
        true
    }

    /// Send the current presence set to one connection
    pub fn request_status(&self, id: ConnectionId) -> bool {
        let outcome = {
            let _guard = self.presence_lock.lock();
            let online_users = self.online_users();
            self.broadcaster
                .send_to(id, ServerMessage::StatusUpdate { online_users })
        };
        if outcome.evicted_authenticated() {
            gauge!(WS_AUTHENTICATED).set(self.registry.authenticated_count() as f64);
            self.broadcast_presence();
        }
        outcome.is_queued()
    }

    /// Remove a closed connection; departures are broadcast right away
    #[instrument(skip(self))]
    pub fn disconnect(&self, id: ConnectionId) -> Option<Connection> {
        let removed = self.registry.unregister(id)?;
        if removed.is_authenticated() {
            info!(user_id = ?removed.user_id, "authenticated connection closed");
            gauge!(WS_AUTHENTICATED).set(self.registry.authenticated_count() as f64);
            self.broadcast_presence();
        }
        Some(removed)
    }

    /// Close the connection if it has not authenticated yet
    pub fn expire_if_pending(&self, id: ConnectionId) -> bool {
        let expired = self.registry.expire_pending(id).is_some();
        if expired {
            warn!(connection = %id, "no auth within grace period, closing");
        }
        expired
    }

    /// Drop connections that stopped sending heartbeats
    #[instrument(skip(self))]
    pub fn sweep_stale(&self) -> Vec<Connection> {
        let removed = self.registry.sweep_stale(self.presence.stale_after());
        let forgotten = self
            .registry
            .prune_last_seen(self.presence.last_seen_retention());
        if forgotten > 0 {
            debug!(forgotten, "pruned last-seen entries");
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "swept stale connections");
            counter!(SWEEP_REMOVED).increment(removed.len() as u64);
            if removed.iter().any(Connection::is_authenticated) {
                gauge!(WS_AUTHENTICATED).set(self.registry.authenticated_count() as f64);
                self.broadcast_presence();
            }
        }
        removed
    }

    /// Current presence set
    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.tracker
            .compute(&self.registry.authenticated(), self.registry.now())
    }

    /// Send a fresh `status_update` to every authenticated connection.
    ///
    /// Connections evicted during delivery change the set, so the snapshot is
    /// recomputed until a pass evicts nobody who was online.
    pub fn broadcast_presence(&self) -> usize {
        let _guard = self.presence_lock.lock();
        loop {
            let online = self.online_users();
            gauge!(PRESENCE_ONLINE_USERS).set(online.len() as f64);
            let report = self
                .broadcaster
                .broadcast(&BroadcastEvent::status_update(online));
            counter!(PRESENCE_BROADCAST).increment(1);
            if !report.evicted_authenticated() {
                return report.delivered;
            }
        }
    }

    /// Emit a business event to its audience
    pub fn publish(&self, event: BroadcastEvent) -> DeliveryReport {
        let report = self.broadcaster.broadcast(&event);
        if report.evicted_authenticated() {
            self.broadcast_presence();
        }
        report
    }

    /// Close every connection
    pub fn shutdown(&self) -> usize {
        let closed = self.registry.clear();
        gauge!(WS_AUTHENTICATED).set(0.0);
        info!(closed, "status hub shut down");
        closed
    }

    /// Run the stale sweep on the configured interval
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hub.presence.sweep_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                hub.sweep_stale();
            }
        })
    }

    fn warn_on_identity_mismatch(&self, id: ConnectionId, claimed: UserId) {
        let bound = self.registry.get(id).and_then(|c| c.user_id);
        if bound != Some(claimed) {
            warn!(connection = %id, claimed, bound = ?bound, "message user id does not match connection");
        }
    }
}
