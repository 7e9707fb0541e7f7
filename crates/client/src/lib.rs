// ============================
// shopstatus-client/src/lib.rs
// ============================
//! Client side of the shop status channel.
//!
//! A [`SessionManager`] keeps one status connection alive for a logged-in
//! user, publishes the online-user set and forwards business events to UI
//! subscribers and to the query cache through the [`CacheInvalidationBridge`].

pub mod cache;
pub mod error;
pub mod identity;
pub mod session;
pub mod transport;

pub use cache::{CacheInvalidationBridge, CacheKey, LocalQueryCache, QueryCache};
pub use error::ClientError;
pub use identity::{Identity, IdentitySource};
pub use session::{ClientConfig, ReconnectPolicy, SessionHandle, SessionManager, SessionState};
pub use transport::{Connector, Transport, WsConnector};
