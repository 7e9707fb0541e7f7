// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between the repair-shop status client and server.
//! This module defines the status channel protocol messages and supporting types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an application user (employee account or kiosk account)
pub type UserId = i64;

/// Identifier of a repair record
pub type RepairId = i64;

/// Identifier of an employee record
pub type EmployeeId = i64;

/// Role tag carried by a connection
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular staff browser tab
    #[default]
    Standard,
    /// Customer-facing signature kiosk
    Kiosk,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Standard => f.write_str("standard"),
            Role::Kiosk => f.write_str("kiosk"),
        }
    }
}

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identity assertion, must be the first message on a connection
    /// # Fields
    /// * `user_id` - Identifier of the logged-in user
    /// * `username` - Display name shown in online indicators
    /// * `role` - Connection role, `standard` when omitted
    #[serde(rename_all = "camelCase")]
    Auth {
        user_id: UserId,
        username: String,
        #[serde(default)]
        role: Role,
    },
    /// Periodic liveness signal
    #[serde(rename_all = "camelCase")]
    Heartbeat { user_id: UserId },
    /// Sent on user interaction to mark the user as active
    #[serde(rename_all = "camelCase")]
    Activity { user_id: UserId },
    /// Ask for a fresh presence snapshot
    RequestStatus,
}

/// One online user as rendered by the online indicators
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: UserId,
    pub username: String,
    /// Whether the user interacted within the freshness window
    pub is_active: bool,
    /// Latest activity across all of the user's connections
    pub last_seen: DateTime<Utc>,
}

/// Which kind of signature a kiosk is asked to collect
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    Dropoff,
    Pickup,
}

/// Mutation applied to an employee record
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeAction {
    Created,
    Updated,
    Deleted,
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// The identity assertion was accepted
    #[serde(rename = "auth_success")]
    AuthSuccess,
    /// Complete presence snapshot, replaces whatever the client holds
    #[serde(rename = "status_update", rename_all = "camelCase")]
    StatusUpdate { online_users: Vec<OnlineUser> },
    /// Reply to a heartbeat
    #[serde(rename = "heartbeat_ack")]
    HeartbeatAck,
    /// A kiosk should collect a customer signature
    #[serde(rename = "signature-request", rename_all = "camelCase")]
    SignatureRequest {
        repair_id: RepairId,
        signature_type: SignatureType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kiosk_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requested_by: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A customer signature was captured for a repair
    #[serde(rename = "signature-completed", rename_all = "camelCase")]
    SignatureCompleted {
        repair_id: RepairId,
        timestamp: DateTime<Utc>,
    },
    /// An employee record was created, changed or removed
    #[serde(rename = "employee_update", rename_all = "camelCase")]
    EmployeeUpdate {
        action: EmployeeAction,
        employee_id: EmployeeId,
        timestamp: DateTime<Utc>,
    },
    /// A kiosk device registered itself with the shop
    #[serde(rename = "kiosk_registered", rename_all = "camelCase")]
    KioskRegistered {
        kiosk_id: UserId,
        name: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Wire name of this message's `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::AuthSuccess => "auth_success",
            ServerMessage::StatusUpdate { .. } => "status_update",
            ServerMessage::HeartbeatAck => "heartbeat_ack",
            ServerMessage::SignatureRequest { .. } => "signature-request",
            ServerMessage::SignatureCompleted { .. } => "signature-completed",
            ServerMessage::EmployeeUpdate { .. } => "employee_update",
            ServerMessage::KioskRegistered { .. } => "kiosk_registered",
        }
    }

    /// True for messages produced by business mutations rather than the
    /// channel itself
    pub fn is_business_event(&self) -> bool {
        matches!(
            self,
            ServerMessage::SignatureRequest { .. }
                | ServerMessage::SignatureCompleted { .. }
                | ServerMessage::EmployeeUpdate { .. }
                | ServerMessage::KioskRegistered { .. }
        )
    }
}

/// Extract the `type` tag from a raw frame that failed to parse, for logging
pub fn peek_message_type(text: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()?
        .get("type")?
        .as_str()
        .map(str::to_owned)
}
