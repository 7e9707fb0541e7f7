// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_DISCONNECTION: &str = "ws.disconnection";
pub const WS_ACTIVE: &str = "ws.active";
pub const WS_AUTHENTICATED: &str = "ws.authenticated";
pub const WS_AUTH_TIMEOUT: &str = "ws.auth_timeout";
pub const WS_PROTOCOL_ERROR: &str = "ws.protocol_error";
pub const PRESENCE_BROADCAST: &str = "presence.broadcast";
pub const PRESENCE_ONLINE_USERS: &str = "presence.online_users";
pub const EVENT_DELIVERED: &str = "event.delivered";
pub const EVENT_EVICTED: &str = "event.evicted";
pub const SWEEP_REMOVED: &str = "sweep.removed";
