//! Best-effort local publish/subscribe between execution contexts
//!
//! Every context joins a named channel and gets its own [`BusEndpoint`].
//! Delivery guarantees are deliberately weak:
//! - only endpoints live at publish time receive a message
//! - a publisher never receives its own messages
//! - no ordering across publishers, no retries, no buffering for late joiners

use crate::command::Command;
use crate::error::StoreResult;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default channel name shared by all contexts of one installation
pub const DEFAULT_CHANNEL: &str = "virtual_camera_channel";

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct Envelope {
    origin: Uuid,
    message: Arc<serde_json::Value>,
}

/// Result of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to this many other live endpoints
    Delivered(usize),
    /// No other endpoint was listening; the message is gone
    Dropped,
}

/// Hub owning every named channel
#[derive(Debug, Clone)]
pub struct SyncBus {
    channels: Arc<DashMap<String, broadcast::Sender<Envelope>>>,
    capacity: usize,
}

impl Default for SyncBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncBus {
    /// Create a hub with the default per-listener backlog
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a hub with a custom per-listener backlog
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Envelope> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Join a channel as a new endpoint
    pub fn join(&self, channel: &str) -> BusEndpoint {
        let tx = self.sender(channel);
        let rx = tx.subscribe();
        let id = Uuid::new_v4();
        debug!("Endpoint {} joined channel {}", id, channel);
        BusEndpoint {
            id,
            channel: channel.to_string(),
            tx,
            rx,
        }
    }

    /// Number of endpoints currently listening on a channel
    pub fn live_endpoints(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// One context's attachment to a channel
#[derive(Debug)]
pub struct BusEndpoint {
    id: Uuid,
    channel: String,
    tx: broadcast::Sender<Envelope>,
    rx: broadcast::Receiver<Envelope>,
}

impl BusEndpoint {
    /// Origin id stamped on this endpoint's messages
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish a command to every other live endpoint
    pub fn publish(&self, command: &Command) -> StoreResult<Delivery> {
        let delivery = self.publish_message(command.to_message()?);
        if delivery == Delivery::Dropped {
            debug!("No listeners for {}; dropped", command.kind());
        }
        Ok(delivery)
    }

    /// Publish a raw structured message
    pub fn publish_message(&self, message: serde_json::Value) -> Delivery {
        // Our own receiver is always counted
        let others = self.tx.receiver_count().saturating_sub(1);
        if others == 0 {
            return Delivery::Dropped;
        }
        let envelope = Envelope {
            origin: self.id,
            message: Arc::new(message),
        };
        match self.tx.send(envelope) {
            Ok(_) => Delivery::Delivered(others),
            Err(_) => Delivery::Dropped,
        }
    }

    /// Wait for the next command from another endpoint
    ///
    /// Own messages and malformed payloads are skipped. Returns `None` once
    /// the channel is closed.
    pub async fn recv(&mut self) -> Option<Command> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if envelope.origin == self.id {
                        continue;
                    }
                    match Command::from_message(&envelope.message) {
                        Ok(command) => return Some(command),
                        Err(e) => {
                            warn!("Ignoring bus message on {}: {}", self.channel, e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Endpoint {} lagged on {}; {} messages skipped",
                        self.id, self.channel, skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next pending command without waiting
    pub fn try_recv(&mut self) -> Option<Command> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    if envelope.origin == self.id {
                        continue;
                    }
                    match Command::from_message(&envelope.message) {
                        Ok(command) => return Some(command),
                        Err(e) => warn!("Ignoring bus message on {}: {}", self.channel, e),
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Endpoint {} lagged; {} messages skipped", self.id, skipped);
                }
                Err(_) => return None,
            }
        }
    }
}
