// ============================
// shopstatus-backend-lib/src/lib.rs
// ============================
//! Real-time presence and event notification for the repair shop server.

pub mod broadcaster;
pub mod clock;
pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod validation;
pub mod ws_router;

use std::sync::Arc;

use crate::config::Settings;
use crate::hub::StatusHub;

pub use crate::broadcaster::BroadcastEvent;
pub use crate::error::AppError;

/// Application state shared across all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    /// Presence and event hub
    pub hub: Arc<StatusHub>,
}

impl AppState {
    /// Build state on the wall clock
    pub fn new(settings: &Settings) -> Self {
        Self {
            hub: Arc::new(StatusHub::with_system_clock(settings)),
        }
    }
}
