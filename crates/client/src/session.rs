//! Client session manager.
//!
//! Keeps one status connection per tab while an identity is available:
//! `Disconnected -> Connecting -> Connected -> Disconnected -> ...`.
//! The first frame on every connection is `auth`. While connected the session
//! sends a heartbeat every interval and at most one activity ping per
//! interval, on the first user input after each heartbeat tick. A lost
//! connection is retried according to the [`ReconnectPolicy`]; logging out
//! closes the connection, clears the presence set and waits for the next login.

use rand::Rng;
use shopstatus_common::{peek_message_type, ClientMessage, OnlineUser, ServerMessage};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::cache::CacheInvalidationBridge;
use crate::identity::{Identity, IdentitySource};
use crate::transport::{Connector, Transport, WsConnector};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// How long to wait before reconnecting after a lost connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay every time, retried for as long as the user stays logged in
    Fixed(Duration),
    /// `base * 2^attempt` capped at `max`; with `jitter` the delay is drawn
    /// uniformly from the upper half of that value
    ExponentialBackoff {
        base: Duration,
        max: Duration,
        jitter: bool,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self::ExponentialBackoff {
            base,
            max,
            jitter: true,
        }
    }

    /// Delay before retry number `attempt`, counting from zero since the last
    /// successful connection
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::ExponentialBackoff { base, max, jitter } => {
                let factor = 2u32.saturating_pow(attempt.min(16));
                let capped = base.saturating_mul(factor).min(*max);
                if !*jitter || capped.is_zero() {
                    return capped;
                }
                let ceiling = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
                Duration::from_millis(rand::rng().random_range(ceiling / 2..=ceiling))
            },
        }
    }
}

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Status endpoint, e.g. `ws://localhost:8080/ws/status`
    pub url: String,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicy,
    /// Buffered business events per subscriber
    pub event_capacity: usize,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect: ReconnectPolicy::default(),
            event_capacity: 64,
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

/// Builds and starts a status session
pub struct SessionManager {
    config: ClientConfig,
    identity: IdentitySource,
    connector: Arc<dyn Connector>,
    bridge: Option<CacheInvalidationBridge>,
}

impl SessionManager {
    pub fn new(config: ClientConfig, identity: IdentitySource) -> Self {
        Self {
            config,
            identity,
            connector: Arc::new(WsConnector),
            bridge: None,
        }
    }

    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Forward business events to a query cache
    pub fn with_cache_bridge(mut self, bridge: CacheInvalidationBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Start the session task. Dropping the returned handle stops it.
    pub fn spawn(self) -> SessionHandle {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (presence_tx, presence_rx) = watch::channel(Vec::new());
        let (events_tx, _) = broadcast::channel(self.config.event_capacity.max(1));
        let (input_tx, input_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = SessionTask {
            identity_rx: self.identity.subscribe(),
            _identity: self.identity,
            config: self.config,
            connector: self.connector,
            bridge: self.bridge,
            state: state_tx,
            presence: presence_tx,
            events: events_tx.clone(),
            input: input_rx,
            shutdown: shutdown_rx,
        };

        SessionHandle {
            state: state_rx,
            presence: presence_rx,
            events: events_tx,
            input: input_tx,
            shutdown: shutdown_tx,
            task: tokio::spawn(task.run()),
        }
    }
}

/// Surface for UI code
#[derive(Debug)]
pub struct SessionHandle {
    state: watch::Receiver<SessionState>,
    presence: watch::Receiver<Vec<OnlineUser>>,
    events: broadcast::Sender<ServerMessage>,
    input: mpsc::Sender<()>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Last presence snapshot received from the server
    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.presence.borrow().clone()
    }

    pub fn watch_presence(&self) -> watch::Receiver<Vec<OnlineUser>> {
        self.presence.clone()
    }

    /// Business events received from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.events.subscribe()
    }

    /// Report a pointer-down, key-down, scroll or touch-start
    pub fn user_input(&self) {
        // a pending input already covers this one
        let _ = self.input.try_send(());
    }

    /// Close the connection and wait for the session task to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "session task failed");
        }
    }
}

enum Exit {
    Shutdown,
    LoggedOut,
    IdentityChanged,
    Lost,
}

struct SessionTask {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    bridge: Option<CacheInvalidationBridge>,
    // keeps the identity channel open for the lifetime of the task
    _identity: IdentitySource,
    identity_rx: watch::Receiver<Option<Identity>>,
    state: watch::Sender<SessionState>,
    presence: watch::Sender<Vec<OnlineUser>>,
    events: broadcast::Sender<ServerMessage>,
    input: mpsc::Receiver<()>,
    shutdown: watch::Receiver<bool>,
}

impl SessionTask {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        'session: loop {
            let Some(identity) = self.wait_for_identity().await else {
                break;
            };

            self.set_state(SessionState::Connecting);
            let connected = tokio::select! {
                res = self.connector.connect(&self.config.url) => res,
                _ = self.shutdown.changed() => break,
            };

            let exit = match connected {
                Ok(mut transport) => {
                    let exit = self.drive(transport.as_mut(), &identity).await;
                    transport.close().await;
                    exit
                },
                Err(e) => {
                    warn!(error = %e, attempt, "status connection failed");
                    Exit::Lost
                },
            };

            if matches!(exit, Exit::LoggedOut | Exit::IdentityChanged) {
                self.presence.send_replace(Vec::new());
            }
            if *self.state.borrow() == SessionState::Connected {
                attempt = 0;
            }
            self.set_state(SessionState::Disconnected);

            match exit {
                Exit::Shutdown => break,
                Exit::LoggedOut | Exit::IdentityChanged => continue,
                Exit::Lost => {},
            }

            let delay = self.config.reconnect.delay(attempt);
            attempt = attempt.saturating_add(1);
            info!(?delay, attempt, "reconnecting");

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    () = &mut sleep => break,
                    _ = self.shutdown.changed() => break 'session,
                    _ = self.identity_rx.changed() => {
                        let current = self.identity_rx.borrow().clone();
                        if current.as_ref() != Some(&identity) {
                            self.presence.send_replace(Vec::new());
                            continue 'session;
                        }
                    },
                }
            }
        }

        self.set_state(SessionState::Disconnected);
        debug!("session task stopped");
    }

    async fn wait_for_identity(&mut self) -> Option<Identity> {
        loop {
            if let Some(identity) = self.identity_rx.borrow_and_update().clone() {
                return Some(identity);
            }
            tokio::select! {
                _ = self.identity_rx.changed() => {},
                _ = self.shutdown.changed() => return None,
            }
        }
    }

    async fn drive(&mut self, transport: &mut dyn Transport, identity: &Identity) -> Exit {
        let auth = ClientMessage::Auth {
            user_id: identity.user_id,
            username: identity.username.clone(),
            role: identity.role,
        };
        if let Err(e) = transport.send(&auth).await {
            warn!(error = %e, "failed to send auth");
            return Exit::Lost;
        }
        self.set_state(SessionState::Connected);
        info!(user_id = identity.user_id, "status session connected");

        // inputs from before this connection do not count
        while self.input.try_recv().is_ok() {}
        let mut activity_armed = true;

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return Exit::Shutdown,
                _ = self.identity_rx.changed() => {
                    let current = self.identity_rx.borrow().clone();
                    match current {
                        None => {
                            info!("logged out, closing status session");
                            return Exit::LoggedOut;
                        },
                        Some(current) if current != *identity => return Exit::IdentityChanged,
                        Some(_) => {},
                    }
                },
                _ = heartbeat.tick() => {
                    activity_armed = true;
                    let msg = ClientMessage::Heartbeat { user_id: identity.user_id };
                    if let Err(e) = transport.send(&msg).await {
                        warn!(error = %e, "failed to send heartbeat");
                        return Exit::Lost;
                    }
                },
                Some(()) = self.input.recv() => {
                    if activity_armed {
                        activity_armed = false;
                        let msg = ClientMessage::Activity { user_id: identity.user_id };
                        if let Err(e) = transport.send(&msg).await {
                            warn!(error = %e, "failed to send activity");
                            return Exit::Lost;
                        }
                    }
                },
                frame = transport.recv() => match frame {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(e)) => {
                        warn!(error = %e, "status connection error");
                        return Exit::Lost;
                    },
                    None => {
                        info!("status connection closed by server");
                        return Exit::Lost;
                    },
                },
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::StatusUpdate { online_users }) => {
                debug!(count = online_users.len(), "presence updated");
                self.presence.send_replace(online_users);
            },
            Ok(event) if event.is_business_event() => {
                if let Some(bridge) = &self.bridge {
                    bridge.apply(&event);
                }
                // no subscribers is fine
                let _ = self.events.send(event);
            },
            Ok(ServerMessage::HeartbeatAck) => trace!("heartbeat acknowledged"),
            Ok(other) => debug!(kind = other.kind(), "channel message"),
            Err(e) => match peek_message_type(text) {
                Some(kind) => warn!(kind = %kind, error = %e, "unhandled server message"),
                None => warn!(error = %e, "malformed server message"),
            },
        }
    }

    fn set_state(&self, next: SessionState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            debug!(state = %next, "session state changed");
        }
    }
}
