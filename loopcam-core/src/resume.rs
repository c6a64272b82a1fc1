//! Checkpoint applicability and resume policy

use crate::fingerprint::Fingerprint;
use crate::records::PlaybackCheckpoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// How a saved offset is turned into a resume position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumePolicy {
    /// Resume exactly where the checkpoint was taken
    Exact,
    /// Add the wall-clock time elapsed since the checkpoint
    #[default]
    Extrapolated,
}

/// Why a resume offset was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeReason {
    /// No checkpoint was stored
    NoCheckpoint,
    /// Checkpoint belonged to different media and was discarded
    StaleFingerprint,
    /// Checkpoint applied as saved
    Exact,
    /// Checkpoint applied with elapsed time added
    Extrapolated,
}

/// Outcome of resolving a checkpoint against the current media
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResumeDecision {
    /// Offset to seek to, in seconds
    pub offset_seconds: f64,
    /// Why this offset was chosen
    pub reason: ResumeReason,
    /// Age of the applied checkpoint, if one was applied
    pub saved_ago: Option<Duration>,
}

impl ResumeDecision {
    /// Start from the beginning
    pub fn from_start(reason: ResumeReason) -> Self {
        Self {
            offset_seconds: 0.0,
            reason,
            saved_ago: None,
        }
    }

    /// Whether a checkpoint was actually applied
    pub fn resumed(&self) -> bool {
        matches!(self.reason, ResumeReason::Exact | ResumeReason::Extrapolated)
    }
}

/// Wall-clock milliseconds since the Unix epoch
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Decide where playback should resume
///
/// A checkpoint whose fingerprint does not match `current` is never applied.
/// `duration` of zero or less (unknown) disables wrapping and clamping.
pub fn resolve_resume_offset(
    checkpoint: Option<&PlaybackCheckpoint>,
    current: Option<&Fingerprint>,
    duration: f64,
    looping: bool,
    policy: ResumePolicy,
    now_ms: i64,
) -> ResumeDecision {
    let Some(checkpoint) = checkpoint else {
        return ResumeDecision::from_start(ResumeReason::NoCheckpoint);
    };
    if !checkpoint.applies_to(current) {
        debug!("Checkpoint fingerprint differs from current media, starting from 0");
        return ResumeDecision::from_start(ResumeReason::StaleFingerprint);
    }

    let saved_ago = checkpoint.age(now_ms);
    let (mut offset, reason) = match policy {
        ResumePolicy::Exact => (checkpoint.offset_seconds, ResumeReason::Exact),
        ResumePolicy::Extrapolated => (
            checkpoint.offset_seconds + saved_ago.as_secs_f64(),
            ResumeReason::Extrapolated,
        ),
    };

    let known_duration = duration.is_finite() && duration > 0.0;
    if known_duration {
        if looping {
            offset %= duration;
        }
        offset = offset.min(duration);
    }
    if !offset.is_finite() || offset < 0.0 {
        offset = 0.0;
    }

    ResumeDecision {
        offset_seconds: offset,
        reason,
        saved_ago: Some(saved_ago),
    }
}
