//! Producer controller
//!
//! The producer is the user-facing control surface. It is the only context
//! that writes the enabled flag and the media record, and the only one that
//! publishes playback commands. While enabled and playing it broadcasts its
//! position at most once per sync interval and checkpoints it at most once
//! per autosave interval.

use crate::config::LoopCamConfig;
use crate::context::Context;
use crate::error::{LoopCamError, LoopCamResult};
use crate::event::{ProducerEvent, ProducerEvents};
use bytes::Bytes;
use loopcam_core::{
    now_epoch_ms, resolve_resume_offset, BusEndpoint, Command, Delivery, Fingerprint, Repository,
    ResumeDecision,
};
use loopcam_media::{LoadOutcome, MediaError, PlaybackCoordinator, SeekThrottle};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

const RESET_PROMPT: &str =
    "Erase the stored video, the saved position and the on/off setting? This cannot be undone.";

/// A file handed to [`Producer::upload`]
#[derive(Debug, Clone)]
pub struct MediaUpload {
    /// Declared MIME type
    pub mime_type: String,
    /// File contents
    pub bytes: Bytes,
}

impl MediaUpload {
    /// Create an upload
    pub fn new(mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Whether the declared type is a video type
    pub fn is_video(&self) -> bool {
        self.mime_type
            .trim()
            .to_ascii_lowercase()
            .starts_with("video/")
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the file is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Explicit confirmation for destructive operations
pub trait ConfirmPrompt: Send + Sync {
    /// Ask the user; `true` means go ahead
    fn confirm(&self, message: &str) -> bool;
}

impl<F> ConfirmPrompt for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, message: &str) -> bool {
        self(message)
    }
}

struct SyncState {
    last_sync: Option<Instant>,
    last_autosave: Option<Instant>,
    outgoing: SeekThrottle,
}

struct ProducerShared {
    id: Uuid,
    config: LoopCamConfig,
    repo: Repository,
    endpoint: BusEndpoint,
    coordinator: PlaybackCoordinator,
    enabled: AtomicBool,
    sync: Mutex<SyncState>,
    events: broadcast::Sender<ProducerEvent>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProducerShared {
    fn publish(&self, command: Command) {
        match self.endpoint.publish(&command) {
            Ok(Delivery::Delivered(n)) => debug!("Sent {} to {} contexts", command.kind(), n),
            Ok(Delivery::Dropped) => {}
            Err(e) => warn!("Failed to send {}: {}", command.kind(), e),
        }
    }

    fn emit(&self, event: ProducerEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn report(&self, error: LoopCamError) -> LoopCamError {
        self.emit(ProducerEvent::Error {
            error: error.to_string(),
            recoverable: error.is_recoverable(),
        });
        error
    }

    fn ensure_sync_task(self: &Arc<Self>) {
        let mut task = self.sync_task.lock();
        if task.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let period = self.config.sync_interval();
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.sync_tick().await;
            }
        }));
    }

    async fn sync_tick(&self) {
        if !self.enabled.load(Ordering::Acquire) || !self.coordinator.is_playing() {
            return;
        }
        let now = Instant::now();
        let (send_sync, autosave) = {
            let mut state = self.sync.lock();
            let send_sync = state
                .last_sync
                .map_or(true, |t| now.saturating_duration_since(t) >= self.config.sync_interval());
            if send_sync {
                state.last_sync = Some(now);
            }
            let autosave = match state.last_autosave {
                Some(t) => now.saturating_duration_since(t) >= self.config.autosave_interval(),
                None => {
                    state.last_autosave = Some(now);
                    false
                }
            };
            if autosave {
                state.last_autosave = Some(now);
            }
            (send_sync, autosave)
        };

        if send_sync {
            self.publish(Command::Sync {
                time: self.coordinator.position(),
            });
        }
        if autosave {
            if let Err(e) = self.persist_position("autosave").await {
                warn!("Autosave failed: {}", e);
            }
        }
    }

    async fn persist_position(&self, reason: &str) -> LoopCamResult<Option<f64>> {
        let Some(loaded) = self.coordinator.loaded_fingerprint() else {
            return Ok(None);
        };
        let offset = self.coordinator.position();
        match self.repo.save_checkpoint(offset, &loaded).await? {
            Some(checkpoint) => {
                debug!("Checkpoint ({}) at {:.2}s", reason, checkpoint.offset_seconds);
                self.emit(ProducerEvent::CheckpointSaved {
                    offset_seconds: checkpoint.offset_seconds,
                });
                Ok(Some(checkpoint.offset_seconds))
            }
            None => Ok(None),
        }
    }

    async fn resume_from_checkpoint(&self) -> LoopCamResult<ResumeDecision> {
        let checkpoint = self.repo.load_checkpoint().await;
        let current = self.coordinator.loaded_fingerprint();
        let decision = resolve_resume_offset(
            checkpoint.as_ref(),
            current.as_ref(),
            self.coordinator.duration(),
            self.config.loop_playback,
            self.config.resume_policy,
            now_epoch_ms(),
        );
        self.coordinator.seek_now(decision.offset_seconds).await?;
        Ok(decision)
    }

    async fn start_playback(&self) -> LoopCamResult<()> {
        self.coordinator.play().await?;
        let mut state = self.sync.lock();
        state.last_autosave = Some(Instant::now());
        Ok(())
    }

    fn mark_synced(&self) {
        self.sync.lock().last_sync = Some(Instant::now());
    }
}

impl Drop for ProducerShared {
    fn drop(&mut self) {
        if let Some(task) = self.sync_task.get_mut().take() {
            task.abort();
        }
    }
}

/// User-facing control surface
#[derive(Clone)]
pub struct Producer {
    shared: Arc<ProducerShared>,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.shared.id)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Producer {
    /// Wrap a producer context; call [`initialize`](Self::initialize) next
    pub fn new(context: Context) -> Self {
        let sync_window = context.config.playback().seek_throttle;
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(ProducerShared {
                id: context.id,
                config: context.config,
                repo: context.repo,
                endpoint: context.endpoint,
                coordinator: context.coordinator,
                enabled: AtomicBool::new(false),
                sync: Mutex::new(SyncState {
                    last_sync: None,
                    last_autosave: None,
                    outgoing: SeekThrottle::new(sync_window),
                }),
                events,
                sync_task: Mutex::new(None),
            }),
        }
    }

    /// Context id
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Subscribe to status events
    pub fn events(&self) -> ProducerEvents {
        ProducerEvents::new(self.shared.events.subscribe())
    }

    /// Local playback coordinator
    pub fn coordinator(&self) -> &PlaybackCoordinator {
        &self.shared.coordinator
    }

    /// Whether the virtual source is on
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Current playback offset in seconds
    pub fn position(&self) -> f64 {
        self.shared.coordinator.position()
    }

    /// Load the stored flag and video, resuming playback if enabled
    ///
    /// Returns how the playback offset was chosen, or `None` when no video
    /// is stored yet.
    pub async fn initialize(&self) -> LoopCamResult<Option<ResumeDecision>> {
        let shared = &self.shared;
        let enabled = shared.repo.load_enabled().await;
        shared.enabled.store(enabled, Ordering::Release);
        shared.ensure_sync_task();

        let decision = match shared.coordinator.reload().await {
            Ok(LoadOutcome::Loaded(decision)) => Some(decision),
            Ok(_) => {
                info!("No video stored yet");
                None
            }
            Err(e) => return Err(shared.report(e.into())),
        };

        if enabled && decision.is_some() {
            shared.start_playback().await?;
        }
        if let Some(decision) = decision.filter(|d| d.resumed()) {
            shared.emit(ProducerEvent::Resumed { decision });
        }
        info!("Producer initialized (enabled: {})", enabled);
        Ok(decision)
    }

    /// Switch the virtual source on
    ///
    /// The flag is persisted before anything is broadcast. If a video is
    /// stored, playback resumes from a checkpoint that matches it, or 0.
    pub async fn enable(&self) -> LoopCamResult<Option<ResumeDecision>> {
        let shared = &self.shared;
        shared.repo.save_enabled(true).await?;
        shared.enabled.store(true, Ordering::Release);
        shared.ensure_sync_task();

        let decision = match shared.coordinator.ensure_loaded().await {
            Ok(()) => {
                let decision = shared.resume_from_checkpoint().await?;
                shared.start_playback().await?;
                Some(decision)
            }
            Err(MediaError::NoMedia) => {
                info!("Enabled without a stored video");
                None
            }
            Err(e) => return Err(shared.report(e.into())),
        };

        shared.publish(Command::TurnOn);
        if decision.is_some() {
            shared.publish(Command::Sync {
                time: shared.coordinator.position(),
            });
            shared.mark_synced();
        }

        shared.emit(ProducerEvent::StatusChanged { enabled: true });
        if let Some(decision) = decision.filter(|d| d.resumed()) {
            shared.emit(ProducerEvent::Resumed { decision });
        }
        info!("Virtual camera enabled");
        Ok(decision)
    }

    /// Switch the virtual source off
    ///
    /// Saves the position, pauses, rewinds to 0 and clears the checkpoint,
    /// since the offset no longer means anything once disabled.
    pub async fn disable(&self) -> LoopCamResult<()> {
        let shared = &self.shared;
        shared.persist_position("disable").await?;
        shared.repo.save_enabled(false).await?;
        shared.enabled.store(false, Ordering::Release);

        shared.coordinator.pause().await?;
        if shared.coordinator.state().is_loaded() {
            shared.coordinator.seek_now(0.0).await?;
        }
        shared.repo.clear_checkpoint().await?;

        shared.publish(Command::TurnOff);
        shared.emit(ProducerEvent::StatusChanged { enabled: false });
        info!("Virtual camera disabled");
        Ok(())
    }

    /// Flip the virtual source; returns the new state
    pub async fn toggle(&self) -> LoopCamResult<bool> {
        if self.is_enabled() {
            self.disable().await?;
            Ok(false)
        } else {
            self.enable().await?;
            Ok(true)
        }
    }

    /// Resume playback and tell other contexts
    pub async fn play(&self) -> LoopCamResult<()> {
        self.shared.start_playback().await?;
        self.shared.publish(Command::Play);
        Ok(())
    }

    /// Pause, checkpoint and tell other contexts
    pub async fn pause(&self) -> LoopCamResult<()> {
        self.shared.coordinator.pause().await?;
        self.shared.persist_position("pause").await?;
        self.shared.publish(Command::Pause);
        Ok(())
    }

    /// Move playback to `time` seconds
    ///
    /// Applied locally at once and checkpointed; the broadcast to other
    /// contexts is throttled and restarts the sync timer.
    pub async fn seek(&self, time: f64) -> LoopCamResult<f64> {
        let shared = &self.shared;
        let position = shared.coordinator.seek_now(time).await?;
        shared.persist_position("seek").await?;

        let now = Instant::now();
        let admitted = {
            let mut state = shared.sync.lock();
            let admitted = state.outgoing.try_acquire(now);
            if admitted {
                state.last_sync = Some(now);
            }
            admitted
        };
        if admitted {
            shared.publish(Command::Seek { time: position });
        } else {
            debug!("Seek broadcast to {:.2}s throttled", position);
        }
        Ok(position)
    }

    /// Store a new video
    ///
    /// Anything not declared as a video, empty, or above the configured size
    /// limit is rejected before storage is touched.
    pub async fn upload(&self, upload: MediaUpload) -> LoopCamResult<Fingerprint> {
        let shared = &self.shared;
        if !upload.is_video() {
            let shown = if upload.mime_type.is_empty() {
                "unknown type"
            } else {
                upload.mime_type.as_str()
            };
            return Err(shared.report(LoopCamError::UploadRejected {
                reason: format!("{} is not a video", shown),
            }));
        }
        if upload.is_empty() {
            return Err(shared.report(LoopCamError::UploadRejected {
                reason: "file is empty".to_string(),
            }));
        }
        if let Some(limit) = shared.config.max_upload_bytes {
            if upload.len() > limit {
                return Err(shared.report(LoopCamError::UploadTooLarge {
                    size: upload.len(),
                    limit,
                }));
            }
        }

        let size = upload.len();
        let fingerprint = shared.repo.replace_media(upload.bytes).await?;
        info!("Stored video {} ({} bytes)", fingerprint.short(), size);
        shared.publish(Command::SourceChanged);
        shared.emit(ProducerEvent::Uploaded {
            fingerprint: fingerprint.clone(),
            size,
        });

        if let Err(e) = shared.coordinator.reload().await {
            return Err(shared.report(e.into()));
        }
        if self.is_enabled() && !shared.coordinator.is_playing() {
            shared.start_playback().await?;
        }
        Ok(fingerprint)
    }

    /// Erase everything after explicit confirmation
    ///
    /// Returns `false` without touching anything when not confirmed.
    pub async fn reset(&self, prompt: &dyn ConfirmPrompt) -> LoopCamResult<bool> {
        if !prompt.confirm(RESET_PROMPT) {
            info!("Reset cancelled");
            return Ok(false);
        }
        let shared = &self.shared;
        shared.repo.wipe_all().await?;
        shared.enabled.store(false, Ordering::Release);
        shared.coordinator.reset();
        {
            let mut state = shared.sync.lock();
            state.last_sync = None;
            state.last_autosave = None;
            state.outgoing.reset();
        }
        shared.publish(Command::TurnOff);
        shared.emit(ProducerEvent::Reset);
        info!("All stored data reset");
        Ok(true)
    }

    /// Checkpoint because the control surface was hidden
    pub async fn on_hidden(&self) -> LoopCamResult<()> {
        self.shared.persist_position("hidden").await?;
        Ok(())
    }

    /// Stop background work, checkpointing a non-zero position
    pub async fn shutdown(&self) -> LoopCamResult<()> {
        if let Some(task) = self.shared.sync_task.lock().take() {
            task.abort();
        }
        if self.position() > 0.0 {
            self.shared.persist_position("teardown").await?;
        }
        info!("Producer {} shut down", self.shared.id);
        Ok(())
    }
}
