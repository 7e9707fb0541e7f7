//! Transport seam between the session manager and the network.
//!
//! [`WsConnector`] opens real WebSocket connections with tokio-tungstenite;
//! [`memory::MemoryConnector`] hands out in-process channel pairs.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use shopstatus_common::ClientMessage;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::ClientError;

/// One open status connection
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError>;

    /// Next text frame; `None` once the peer has closed.
    /// Must be cancel safe, it is polled inside `select!`.
    async fn recv(&mut self) -> Option<Result<String, ClientError>>;

    async fn close(&mut self);
}

/// Opens transports to a status endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ClientError>;
}

/// tokio-tungstenite connector
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ClientError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        debug!(url, "status socket connected");
        Ok(Box::new(WsTransport { stream }))
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        let json = serde_json::to_string(msg)?;
        self.stream
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| ClientError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ClientError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => return None,
                // pings are answered by tungstenite
                Ok(_) => continue,
                Err(e) => return Some(Err(ClientError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// In-process transports for driving a session without a network
pub mod memory {
    use super::{async_trait, ClientError, ClientMessage, Connector, Transport};
    use shopstatus_common::ServerMessage;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Connector whose every successful connect yields a [`MemoryPeer`]
    #[derive(Debug, Clone)]
    pub struct MemoryConnector {
        peers: mpsc::UnboundedSender<MemoryPeer>,
        refusing: Arc<AtomicBool>,
        latency: Duration,
    }

    impl MemoryConnector {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
            let (peers, rx) = mpsc::unbounded_channel();
            (
                Self {
                    peers,
                    refusing: Arc::new(AtomicBool::new(false)),
                    latency: Duration::ZERO,
                },
                rx,
            )
        }

        /// Delay each connect attempt by `latency`
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        /// Make subsequent connect attempts fail
        pub fn set_refusing(&self, refusing: bool) {
            self.refusing.store(refusing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, ClientError> {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.refusing.load(Ordering::SeqCst) {
                return Err(ClientError::Connect("connection refused".to_string()));
            }

            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            self.peers
                .send(MemoryPeer {
                    sent: sent_rx,
                    inbound: inbound_tx,
                })
                .map_err(|_| ClientError::Connect("no listener".to_string()))?;

            Ok(Box::new(MemoryTransport {
                sent: sent_tx,
                inbound: inbound_rx,
            }))
        }
    }

    /// Server end of a memory transport. Dropping it closes the connection.
    #[derive(Debug)]
    pub struct MemoryPeer {
        sent: mpsc::UnboundedReceiver<ClientMessage>,
        inbound: mpsc::UnboundedSender<String>,
    }

    impl MemoryPeer {
        /// Next message the client sent
        pub async fn next_sent(&mut self) -> Option<ClientMessage> {
            self.sent.recv().await
        }

        /// Everything the client has sent so far
        pub fn drain_sent(&mut self) -> Vec<ClientMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.sent.try_recv() {
                out.push(msg);
            }
            out
        }

        pub fn push(&self, msg: &ServerMessage) {
            if let Ok(json) = serde_json::to_string(msg) {
                self.push_raw(json);
            }
        }

        pub fn push_raw(&self, text: impl Into<String>) {
            let _ = self.inbound.send(text.into());
        }
    }

    #[derive(Debug)]
    struct MemoryTransport {
        sent: mpsc::UnboundedSender<ClientMessage>,
        inbound: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
            self.sent.send(msg.clone()).map_err(|_| ClientError::Closed)
        }

        async fn recv(&mut self) -> Option<Result<String, ClientError>> {
            self.inbound.recv().await.map(Ok)
        }

        async fn close(&mut self) {
            self.inbound.close();
        }
    }
}
