//! Cache invalidation bridge.
//!
//! Maps inbound business events to the query-cache keys they make stale.
//! Every invalidation queues a refetch, and a refetch that started before the
//! latest invalidation cannot mark the entry fresh.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shopstatus_common::{RepairId, ServerMessage};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Keys of the client-side query cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A single repair
    Repair(RepairId),
    /// The repair list
    Repairs,
    Employees,
    Users,
    EmployeeStats,
}

/// Cache keys invalidated by an inbound message
pub fn keys_for(msg: &ServerMessage) -> Vec<CacheKey> {
    match msg {
        ServerMessage::SignatureCompleted { repair_id, .. } => {
            vec![CacheKey::Repair(*repair_id), CacheKey::Repairs]
        },
        ServerMessage::EmployeeUpdate { .. } => {
            vec![CacheKey::Employees, CacheKey::Users, CacheKey::EmployeeStats]
        },
        ServerMessage::AuthSuccess
        | ServerMessage::StatusUpdate { .. }
        | ServerMessage::HeartbeatAck
        | ServerMessage::SignatureRequest { .. }
        | ServerMessage::KioskRegistered { .. } => Vec::new(),
    }
}

/// A cache that can mark entries stale and schedule a refetch
pub trait QueryCache: Send + Sync {
    fn invalidate(&self, key: CacheKey);
}

/// One cached query result
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub stale: bool,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every invalidation
    pub generation: u64,
}

/// In-memory query cache; invalidated entries are reported on the refetch channel
#[derive(Debug)]
pub struct LocalQueryCache {
    entries: DashMap<CacheKey, CacheEntry>,
    refetch: mpsc::UnboundedSender<CacheKey>,
}

impl LocalQueryCache {
    /// Create a cache and the receiver for its refetch requests
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CacheKey>) {
        let (refetch, rx) = mpsc::unbounded_channel();
        (
            Self {
                entries: DashMap::new(),
                refetch,
            },
            rx,
        )
    }

    /// Store a fresh result
    pub fn insert(&self, key: CacheKey, value: serde_json::Value) {
        let mut entry = self.entries.entry(key).or_insert_with(|| CacheEntry {
            value: serde_json::Value::Null,
            stale: false,
            updated_at: Utc::now(),
            generation: 0,
        });
        entry.value = value;
        entry.stale = false;
        entry.updated_at = Utc::now();
    }

    /// Generation to pass to [`complete_refetch`](Self::complete_refetch)
    /// when a refetch starts
    pub fn generation(&self, key: CacheKey) -> Option<u64> {
        self.entries.get(&key).map(|entry| entry.generation)
    }

    /// Store a refetched result. Returns false and leaves the entry stale if
    /// it was invalidated again after the refetch started.
    pub fn complete_refetch(&self, key: CacheKey, started_at: u64, value: serde_json::Value) -> bool {
        let Some(mut entry) = self.entries.get_mut(&key) else {
            return false;
        };
        if entry.generation != started_at {
            debug!(?key, started_at, current = entry.generation, "discarding outdated refetch");
            return false;
        }
        entry.value = value;
        entry.stale = false;
        entry.updated_at = Utc::now();
        true
    }

    pub fn get(&self, key: CacheKey) -> Option<CacheEntry> {
        self.entries.get(&key).map(|entry| entry.clone())
    }

    pub fn is_stale(&self, key: CacheKey) -> bool {
        self.entries.get(&key).is_some_and(|entry| entry.stale)
    }

    pub fn stale_keys(&self) -> Vec<CacheKey> {
        self.entries
            .iter()
            .filter(|entry| entry.stale)
            .map(|entry| *entry.key())
            .collect()
    }
}

impl QueryCache for LocalQueryCache {
    /// Mark a cached entry stale and request a refetch. Keys that were
    /// never cached have nothing to refetch.
    fn invalidate(&self, key: CacheKey) {
        let Some(mut entry) = self.entries.get_mut(&key) else {
            return;
        };
        entry.stale = true;
        entry.generation += 1;
        drop(entry);

        if self.refetch.send(key).is_err() {
            debug!(?key, "refetch receiver dropped");
        }
    }
}

/// Applies inbound events to a query cache
#[derive(Clone)]
pub struct CacheInvalidationBridge {
    cache: Arc<dyn QueryCache>,
}

impl fmt::Debug for CacheInvalidationBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheInvalidationBridge").finish_non_exhaustive()
    }
}

impl CacheInvalidationBridge {
    pub fn new(cache: Arc<dyn QueryCache>) -> Self {
        Self { cache }
    }

    /// Invalidate every key affected by `msg` and return them
    pub fn apply(&self, msg: &ServerMessage) -> Vec<CacheKey> {
        let keys = keys_for(msg);
        for key in &keys {
            self.cache.invalidate(*key);
        }
        if !keys.is_empty() {
            debug!(kind = msg.kind(), ?keys, "invalidated cache keys");
        }
        keys
    }
}
