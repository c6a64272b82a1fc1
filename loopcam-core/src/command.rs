//! Playback commands carried on the sync bus

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};

/// Transient playback command
///
/// Wire form is `{ "kind": "...", "time"?: number }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Command {
    /// Start or resume playback
    Play,
    /// Pause playback
    Pause,
    /// User-initiated seek
    Seek {
        /// Target offset in seconds
        time: f64,
    },
    /// Periodic position reconciliation
    Sync {
        /// Producer offset in seconds
        time: f64,
    },
    /// Stored media was replaced
    SourceChanged,
    /// Virtual source was enabled
    TurnOn,
    /// Virtual source was disabled
    TurnOff,
}

impl Command {
    /// Wire name of the command kind
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Seek { .. } => "seek",
            Command::Sync { .. } => "sync",
            Command::SourceChanged => "sourceChanged",
            Command::TurnOn => "turnOn",
            Command::TurnOff => "turnOff",
        }
    }

    /// Target time, for commands that carry one
    pub fn time(&self) -> Option<f64> {
        match self {
            Command::Seek { time } | Command::Sync { time } => Some(*time),
            _ => None,
        }
    }

    /// Whether handling this command needs a local decoder
    pub fn requires_decoder(&self) -> bool {
        matches!(
            self,
            Command::Play
                | Command::Pause
                | Command::Seek { .. }
                | Command::Sync { .. }
                | Command::SourceChanged
        )
    }

    /// Encode to the structured wire message
    pub fn to_message(&self) -> StoreResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a structured wire message
    pub fn from_message(message: &serde_json::Value) -> StoreResult<Self> {
        let command: Command =
            Command::deserialize(message).map_err(|e| StoreError::MalformedMessage {
                reason: e.to_string(),
            })?;
        if let Some(time) = command.time() {
            if !time.is_finite() {
                return Err(StoreError::MalformedMessage {
                    reason: format!("{} time is not finite", command.kind()),
                });
            }
        }
        Ok(command)
    }
}
