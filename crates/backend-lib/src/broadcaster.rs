//! Event broadcaster.
//!
//! Fans typed server messages out to the authenticated connections that match
//! an event's target filter. Delivery is fire-and-forget: each connection gets
//! a non-blocking enqueue, a failed enqueue evicts that connection only, and
//! nothing is retried or replayed.

use chrono::{DateTime, Utc};
use metrics::counter;
use shopstatus_common::{
    EmployeeAction, EmployeeId, OnlineUser, RepairId, Role, ServerMessage, SignatureType, UserId,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::metrics::{EVENT_DELIVERED, EVENT_EVICTED};
use crate::registry::{Connection, ConnectionId, ConnectionRegistry};

/// Which connections an event is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    User(UserId),
    Role(Role),
}

impl Target {
    pub fn matches(&self, conn: &Connection) -> bool {
        match self {
            Target::All => true,
            Target::User(user_id) => conn.user_id == Some(*user_id),
            Target::Role(role) => conn.role == *role,
        }
    }
}

/// A typed, immutable message plus its audience
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastEvent {
    pub message: ServerMessage,
    pub target: Target,
}

impl BroadcastEvent {
    pub fn new(message: ServerMessage, target: Target) -> Self {
        Self { message, target }
    }

    pub fn to_all(message: ServerMessage) -> Self {
        Self::new(message, Target::All)
    }

    /// Full presence snapshot for every authenticated connection
    pub fn status_update(online_users: Vec<OnlineUser>) -> Self {
        Self::to_all(ServerMessage::StatusUpdate { online_users })
    }

    /// Signature request for kiosks; a specific kiosk when `kiosk_id` is set
    pub fn signature_request(
        repair_id: RepairId,
        signature_type: SignatureType,
        kiosk_id: Option<UserId>,
        requested_by: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let target = kiosk_id.map_or(Target::Role(Role::Kiosk), Target::User);
        Self::new(
            ServerMessage::SignatureRequest {
                repair_id,
                signature_type,
                kiosk_id,
                requested_by,
                timestamp,
            },
            target,
        )
    }

    pub fn signature_completed(repair_id: RepairId, timestamp: DateTime<Utc>) -> Self {
        Self::to_all(ServerMessage::SignatureCompleted {
            repair_id,
            timestamp,
        })
    }

    pub fn employee_update(
        action: EmployeeAction,
        employee_id: EmployeeId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::to_all(ServerMessage::EmployeeUpdate {
            action,
            employee_id,
            timestamp,
        })
    }

    pub fn kiosk_registered(kiosk_id: UserId, name: String, timestamp: DateTime<Utc>) -> Self {
        Self::to_all(ServerMessage::KioskRegistered {
            kiosk_id,
            name,
            timestamp,
        })
    }
}

/// Outcome of one broadcast
#[derive(Debug, Default, Clone)]
pub struct DeliveryReport {
    /// Connections the message was queued for
    pub delivered: usize,
    /// Connections removed because delivery failed
    pub evicted: Vec<Connection>,
}

impl DeliveryReport {
    /// True if a removed connection belonged to the presence set
    pub fn evicted_authenticated(&self) -> bool {
        self.evicted.iter().any(Connection::is_authenticated)
    }
}

/// Outcome of a direct send to one connection
#[derive(Debug)]
pub enum DirectSend {
    Queued,
    /// The connection was already gone
    Unknown,
    /// Delivery failed and the connection was removed
    Evicted(Connection),
}

impl DirectSend {
    pub fn is_queued(&self) -> bool {
        matches!(self, DirectSend::Queued)
    }

    /// True if the removed connection belonged to the presence set
    pub fn evicted_authenticated(&self) -> bool {
        matches!(self, DirectSend::Evicted(conn) if conn.is_authenticated())
    }
}

/// Delivers broadcast events through the registry
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl EventBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver to every authenticated connection matching the target.
    ///
    /// Targets are read from one registry snapshot; enqueueing happens after
    /// the lock is released. A closed or full queue evicts that connection and
    /// delivery continues with the rest.
    #[instrument(skip(self, event), fields(kind = event.message.kind(), target = ?event.target))]
    pub fn broadcast(&self, event: &BroadcastEvent) -> DeliveryReport {
        let recipients: Vec<Connection> = self
            .registry
            .authenticated()
            .into_iter()
            .filter(|conn| event.target.matches(conn))
            .collect();

        let mut report = DeliveryReport::default();
        for conn in recipients {
            match conn.handle().deliver(event.message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(connection = %conn.id, error = %e, "delivery failed, dropping connection");
                    if let Some(removed) = self.registry.evict(conn.id) {
                        report.evicted.push(removed);
                    }
                },
            }
        }

        counter!(EVENT_DELIVERED, "kind" => event.message.kind()).increment(report.delivered as u64);
        if !report.evicted.is_empty() {
            counter!(EVENT_EVICTED).increment(report.evicted.len() as u64);
        }
        debug!(delivered = report.delivered, evicted = report.evicted.len(), "broadcast done");
        report
    }

    /// Deliver to one connection regardless of target filters, including
    /// pending connections. A failed send evicts the connection and hands it
    /// back so the caller can refresh presence.
    pub fn send_to(&self, id: ConnectionId, message: ServerMessage) -> DirectSend {
        let Some(conn) = self.registry.get(id) else {
            return DirectSend::Unknown;
        };
        match conn.handle().deliver(message) {
            Ok(()) => DirectSend::Queued,
            Err(e) => {
                warn!(connection = %id, error = %e, "direct send failed, dropping connection");
                counter!(EVENT_EVICTED).increment(1);
                self.registry
                    .evict(id)
                    .map_or(DirectSend::Unknown, DirectSend::Evicted)
            },
        }
    }
}
