//! Logged-in identity as seen by the status client.
use shopstatus_common::{Role, UserId};
use std::sync::Arc;
use tokio::sync::watch;

/// The trusted identity asserted in the `auth` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            role: Role::Standard,
        }
    }

    pub fn kiosk(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            role: Role::Kiosk,
            ..Self::new(user_id, name)
        }
    }
}

/// Shared login state; the session connects while an identity is present
#[derive(Debug, Clone)]
pub struct IdentitySource {
    current: Arc<watch::Sender<Option<Identity>>>,
}

impl Default for IdentitySource {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentitySource {
    /// Start logged out
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            current: Arc::new(tx),
        }
    }

    pub fn logged_in(identity: Identity) -> Self {
        let source = Self::new();
        source.login(identity);
        source
    }

    pub fn login(&self, identity: Identity) {
        self.current.send_replace(Some(identity));
    }

    pub fn logout(&self) {
        self.current.send_replace(None);
    }

    pub fn current(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }
}
