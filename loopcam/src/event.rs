//! Producer events for status display

use loopcam_core::{Fingerprint, ResumeDecision};
use tokio::sync::broadcast;
use tracing::debug;

/// Things a control surface may want to show the user
#[derive(Debug, Clone, PartialEq)]
pub enum ProducerEvent {
    /// Virtual source switched on or off
    StatusChanged {
        /// New enabled flag
        enabled: bool,
    },
    /// Playback resumed from a stored checkpoint
    Resumed {
        /// Offset and age of the applied checkpoint
        decision: ResumeDecision,
    },
    /// A new video was stored
    Uploaded {
        /// Fingerprint of the stored video
        fingerprint: Fingerprint,
        /// Size in bytes
        size: usize,
    },
    /// Playback offset persisted
    CheckpointSaved {
        /// Saved offset in seconds
        offset_seconds: f64,
    },
    /// All stored data erased
    Reset,
    /// An operation failed
    Error {
        /// Error message
        error: String,
        /// Whether this error is recoverable
        recoverable: bool,
    },
}

impl ProducerEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            ProducerEvent::StatusChanged { .. } => "status_changed",
            ProducerEvent::Resumed { .. } => "resumed",
            ProducerEvent::Uploaded { .. } => "uploaded",
            ProducerEvent::CheckpointSaved { .. } => "checkpoint_saved",
            ProducerEvent::Reset => "reset",
            ProducerEvent::Error { .. } => "error",
        }
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(self, ProducerEvent::Error { .. })
    }

    /// One-line human readable description
    pub fn describe(&self) -> String {
        match self {
            ProducerEvent::StatusChanged { enabled: true } => "Virtual camera on".to_string(),
            ProducerEvent::StatusChanged { enabled: false } => "Virtual camera off".to_string(),
            ProducerEvent::Resumed { decision } => match decision.saved_ago {
                Some(ago) => format!(
                    "Resumed at {:.1}s (saved {}s ago)",
                    decision.offset_seconds,
                    ago.as_secs()
                ),
                None => format!("Resumed at {:.1}s", decision.offset_seconds),
            },
            ProducerEvent::Uploaded { fingerprint, size } => {
                format!("Video {} stored ({} bytes)", fingerprint.short(), size)
            }
            ProducerEvent::CheckpointSaved { offset_seconds } => {
                format!("Position saved at {:.1}s", offset_seconds)
            }
            ProducerEvent::Reset => "All data erased".to_string(),
            ProducerEvent::Error { error, .. } => format!("Error: {}", error),
        }
    }
}

/// Stream of producer events for async iteration
#[derive(Debug)]
pub struct ProducerEvents {
    receiver: broadcast::Receiver<ProducerEvent>,
}

impl ProducerEvents {
    pub(crate) fn new(receiver: broadcast::Receiver<ProducerEvent>) -> Self {
        Self { receiver }
    }

    /// Get the next event; `None` once the producer is gone
    pub async fn next(&mut self) -> Option<ProducerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Event listener lagged; {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event without waiting
    pub fn try_next(&mut self) -> Option<ProducerEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
