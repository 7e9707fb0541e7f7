//! Presence tracker: folds registry state into the online-user set.
use chrono::{DateTime, Utc};
use shopstatus_common::{OnlineUser, UserId};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::registry::Connection;

/// Stateless presence computation over registry snapshots
#[derive(Debug, Clone, Copy)]
pub struct PresenceTracker {
    active_window: Duration,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(5 * 60))
    }
}

impl PresenceTracker {
    pub fn new(active_window: Duration) -> Self {
        Self { active_window }
    }

    pub fn active_window(&self) -> Duration {
        self.active_window
    }

    /// Collapse authenticated connections by user.
    ///
    /// A user is active if any of their connections saw activity inside the
    /// window; `last_seen` is the latest activity across their connections and
    /// the display name is taken from the most recently active one. Output is
    /// sorted by user id.
    pub fn compute(&self, connections: &[Connection], now: DateTime<Utc>) -> Vec<OnlineUser> {
        let mut users: BTreeMap<UserId, OnlineUser> = BTreeMap::new();

        for conn in connections.iter().filter(|c| c.is_authenticated()) {
            let Some(user_id) = conn.user_id else {
                continue;
            };
            let username = conn.display_name.clone().unwrap_or_default();
            let is_active = self.is_fresh(conn.last_activity, now);

            users
                .entry(user_id)
                .and_modify(|entry| {
                    entry.is_active |= is_active;
                    if conn.last_activity > entry.last_seen {
                        entry.last_seen = conn.last_activity;
                        entry.username.clone_from(&username);
                    }
                })
                .or_insert_with(|| OnlineUser {
                    user_id,
                    username: username.clone(),
                    is_active,
                    last_seen: conn.last_activity,
                });
        }

        users.into_values().collect()
    }

    fn is_fresh(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - at).to_std() {
            Ok(elapsed) => elapsed <= self.active_window,
            // activity stamped after `now` (clock skew between threads)
            Err(_) => true,
        }
    }
}
