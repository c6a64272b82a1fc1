//! Playback coordinator
//!
//! One coordinator per execution context owns the decoder, the synthetic
//! surface and the draw loop feeding it. It loads media lazily from the
//! durable store, applies checkpoints only when their fingerprint matches,
//! throttles remote position changes and pauses the decoder once the last
//! capture stream ends.
//!
//! State machine:
//!
//! ```text
//! Uninitialized -> Loading -> Ready <-> Playing <-> Paused
//!                     |          ^
//!                     v          |
//!                  Failed    Reloading (any loaded state)
//! ```
//!
//! Every load bumps a generation counter. A load whose generation is no
//! longer current when its storage read or decoder readiness completes is
//! discarded instead of applied.

use crate::config::PlaybackConfig;
use crate::decoder::{DecoderFactory, DecoderStatus, VideoDecoder, VideoInfo};
use crate::error::{MediaError, MediaResult};
use crate::surface::SyntheticSurface;
use crate::throttle::SeekThrottle;
use crate::tracks::MediaStream;
use loopcam_core::{now_epoch_ms, resolve_resume_offset, Command, Fingerprint, Repository, ResumeDecision};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Coordinator lifecycle state
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackState {
    /// No decoder work has happened yet
    Uninitialized,
    /// First load in progress
    Loading,
    /// Source decoded, not playing
    Ready,
    /// Playing
    Playing,
    /// Paused after playing
    Paused,
    /// Replacing a loaded source
    Reloading,
    /// Source could not be decoded
    Failed(String),
}

impl PlaybackState {
    /// Whether a source is decoded and usable
    pub fn is_loaded(&self) -> bool {
        matches!(
            self,
            PlaybackState::Ready | PlaybackState::Playing | PlaybackState::Paused
        )
    }

    /// Whether a load is in flight
    pub fn is_loading(&self) -> bool {
        matches!(self, PlaybackState::Loading | PlaybackState::Reloading)
    }
}

/// Result of a throttled position change
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekOutcome {
    /// Applied; carries the resulting position
    Applied(f64),
    /// Dropped by the throttle
    Throttled,
}

/// Result of loading the stored source
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOutcome {
    /// Source decoded and positioned
    Loaded(ResumeDecision),
    /// Nothing stored
    NoMedia,
    /// A newer load took over before this one finished
    Superseded,
}

struct Inner {
    decoder: Option<Box<dyn VideoDecoder>>,
    loaded: Option<Fingerprint>,
    /// Source that last failed to decode; not retried until storage changes
    failed: Option<Fingerprint>,
    info: Option<VideoInfo>,
    generation: u64,
    throttle: SeekThrottle,
    active_captures: usize,
    surface: Option<Arc<SyntheticSurface>>,
    draw_task: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<Inner>,
    state: watch::Sender<PlaybackState>,
    repo: Repository,
    factory: Arc<dyn DecoderFactory>,
    config: PlaybackConfig,
}

impl Shared {
    fn set_state(&self, next: PlaybackState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            debug!("Playback state {:?} -> {:?}", previous, next);
        }
    }

    fn is_playing(&self) -> bool {
        *self.state.borrow() == PlaybackState::Playing
    }

    fn release_capture(&self) {
        let mut inner = self.inner.lock();
        inner.active_captures = inner.active_captures.saturating_sub(1);
        debug!("Capture released ({} active)", inner.active_captures);
        if inner.active_captures > 0 {
            return;
        }
        if let Some(decoder) = inner.decoder.as_mut() {
            decoder.pause();
        }
        if self.is_playing() {
            self.set_state(PlaybackState::Paused);
        }
        info!("Last capture stream ended; playback paused");
    }

    fn end_of_media(&self) -> bool {
        let inner = self.inner.lock();
        let ended = inner.decoder.as_ref().is_some_and(|d| d.is_ended());
        if ended && self.is_playing() {
            info!("Reached end of video");
            self.set_state(PlaybackState::Paused);
            return true;
        }
        false
    }

    fn draw_frame(&self) {
        if self.end_of_media() {
            return;
        }
        let (frame, surface) = {
            let inner = self.inner.lock();
            if !self.is_playing() {
                return;
            }
            let Some(decoder) = inner.decoder.as_ref() else {
                return;
            };
            let Some(surface) = inner.surface.clone() else {
                return;
            };
            (decoder.current_frame(), surface)
        };
        if let Some(frame) = frame {
            surface.draw(&frame);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(task) = self.inner.get_mut().draw_task.take() {
            task.abort();
        }
    }
}

async fn draw_loop(
    shared: Weak<Shared>,
    mut ticks: Option<broadcast::Receiver<()>>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        match ticks.as_mut() {
            Some(rx) => match rx.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Frame callbacks closed; falling back to timer");
                    ticks = None;
                    continue;
                }
            },
            None => {
                interval.tick().await;
            }
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.draw_frame();
    }
}

/// Per-context owner of the decoder and the synthetic surface
#[derive(Clone)]
pub struct PlaybackCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PlaybackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackCoordinator")
            .field("state", &*self.shared.state.borrow())
            .finish()
    }
}

impl PlaybackCoordinator {
    /// Create a coordinator; nothing is loaded until first needed
    pub fn new(
        repo: Repository,
        factory: Arc<dyn DecoderFactory>,
        config: PlaybackConfig,
    ) -> MediaResult<Self> {
        config.validate()?;
        let (state, _) = watch::channel(PlaybackState::Uninitialized);
        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    decoder: None,
                    loaded: None,
                    failed: None,
                    info: None,
                    generation: 0,
                    throttle: SeekThrottle::new(config.seek_throttle),
                    active_captures: 0,
                    surface: None,
                    draw_task: None,
                }),
                state,
                repo,
                factory,
                config,
            }),
        })
    }

    /// Playback configuration
    pub fn config(&self) -> &PlaybackConfig {
        &self.shared.config
    }

    /// Repository the coordinator loads from
    pub fn repository(&self) -> &Repository {
        &self.shared.repo
    }

    /// Current state
    pub fn state(&self) -> PlaybackState {
        self.shared.state.borrow().clone()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.shared.state.subscribe()
    }

    /// Fingerprint of the media currently loaded
    pub fn loaded_fingerprint(&self) -> Option<Fingerprint> {
        self.shared.inner.lock().loaded.clone()
    }

    /// Intrinsic properties of the loaded media
    pub fn video_info(&self) -> Option<VideoInfo> {
        self.shared.inner.lock().info
    }

    /// Number of live capture streams
    pub fn active_captures(&self) -> usize {
        self.shared.inner.lock().active_captures
    }

    /// Surface backing capture streams, once created
    pub fn surface(&self) -> Option<Arc<SyntheticSurface>> {
        self.shared.inner.lock().surface.clone()
    }

    /// Whether a decoder has been constructed
    pub fn has_decoder(&self) -> bool {
        self.shared.inner.lock().decoder.is_some()
    }

    /// Current playback offset in seconds
    pub fn position(&self) -> f64 {
        self.shared
            .inner
            .lock()
            .decoder
            .as_ref()
            .map(|d| d.current_time())
            .unwrap_or(0.0)
    }

    /// Duration of the loaded media, 0 when nothing is loaded
    pub fn duration(&self) -> f64 {
        self.shared
            .inner
            .lock()
            .decoder
            .as_ref()
            .map(|d| d.duration())
            .unwrap_or(0.0)
    }

    /// Whether the decoder is running
    pub fn is_playing(&self) -> bool {
        self.shared.is_playing()
    }

    /// Move to `Paused` if non-looping playback reached the end
    ///
    /// The draw loop does this every frame; returns whether it happened.
    pub fn tick(&self) -> bool {
        self.shared.end_of_media()
    }

    /// Wait for any in-flight load and report the result
    pub async fn wait_settled(&self) -> MediaResult<()> {
        let mut rx = self.shared.state.subscribe();
        let state = rx
            .wait_for(|s| !s.is_loading())
            .await
            .map(|s| s.clone())
            .map_err(|_| MediaError::InvalidState {
                message: "coordinator dropped".to_string(),
            })?;
        match state {
            PlaybackState::Failed(reason) => Err(MediaError::DecodingFailed { reason }),
            PlaybackState::Uninitialized => Err(MediaError::NoMedia),
            _ => Ok(()),
        }
    }

    /// Load the stored source if nothing is loaded yet
    pub async fn ensure_loaded(&self) -> MediaResult<()> {
        match self.state() {
            state if state.is_loaded() => Ok(()),
            PlaybackState::Failed(reason) => Err(MediaError::DecodingFailed { reason }),
            PlaybackState::Loading | PlaybackState::Reloading => self.wait_settled().await,
            _ => match self.load().await? {
                LoadOutcome::Loaded(_) => Ok(()),
                LoadOutcome::NoMedia => Err(MediaError::NoMedia),
                LoadOutcome::Superseded => self.wait_settled().await,
            },
        }
    }

    /// Reload the stored source, replacing whatever is loaded
    pub async fn reload(&self) -> MediaResult<LoadOutcome> {
        info!("Reloading video from storage");
        self.load().await
    }

    /// Reload when the stored fingerprint differs from the loaded one
    ///
    /// Returns whether a reload happened. Nothing is done before the first
    /// load, since that load reads the latest source anyway. A source that
    /// failed to decode counts as loaded, so it is not decoded again.
    pub async fn check_for_update(&self) -> MediaResult<bool> {
        if self.state().is_loading() {
            // Outcome of the in-flight load is re-checked below
            let _ = self.wait_settled().await;
        }
        if self.state() == PlaybackState::Uninitialized {
            return Ok(false);
        }
        let stored = self.shared.repo.load_fingerprint().await;
        let current = {
            let inner = self.shared.inner.lock();
            inner.loaded.clone().or_else(|| inner.failed.clone())
        };
        if stored == current {
            return Ok(false);
        }
        info!(
            "Stored video changed ({}); reloading",
            stored.as_ref().map(|f| f.short()).unwrap_or("none")
        );
        self.load().await?;
        Ok(true)
    }

    async fn load(&self) -> MediaResult<LoadOutcome> {
        let shared = &self.shared;
        let (generation, was_playing) = {
            let mut inner = shared.inner.lock();
            inner.generation += 1;
            let was_playing = shared.is_playing();
            let next = if inner.loaded.is_some() {
                PlaybackState::Reloading
            } else {
                PlaybackState::Loading
            };
            shared.set_state(next);
            (inner.generation, was_playing)
        };

        let source = shared.repo.load_current_source().await;

        let mut status = {
            let mut guard = shared.inner.lock();
            let inner = &mut *guard;
            if inner.generation != generation {
                debug!("Load {} superseded after storage read", generation);
                return Ok(LoadOutcome::Superseded);
            }
            let Some(media) = source.media.as_ref() else {
                if let Some(decoder) = inner.decoder.as_mut() {
                    decoder.pause();
                }
                inner.loaded = None;
                inner.failed = None;
                inner.info = None;
                shared.set_state(PlaybackState::Uninitialized);
                debug!("No stored video to load");
                return Ok(LoadOutcome::NoMedia);
            };
            let factory = &shared.factory;
            let decoder = inner.decoder.get_or_insert_with(|| {
                debug!("Constructing decoder");
                factory.create()
            });
            decoder.set_looping(shared.config.looping);
            decoder.set_source(media.bytes.clone());
            decoder.status()
        };

        let settled = status
            .wait_for(|s| s.is_settled())
            .await
            .map(|s| s.clone());

        let mut guard = shared.inner.lock();
        let inner = &mut *guard;
        if inner.generation != generation {
            debug!("Load {} superseded before decoder was ready", generation);
            return Ok(LoadOutcome::Superseded);
        }

        let info = match settled {
            Ok(DecoderStatus::Ready(info)) => info,
            Ok(DecoderStatus::Failed(reason)) => {
                return Err(self.fail(inner, &source.fingerprint, reason));
            }
            Ok(other) => {
                let reason = format!("unexpected decoder status {:?}", other);
                return Err(self.fail(inner, &source.fingerprint, reason));
            }
            Err(_) => {
                let reason = "decoder went away".to_string();
                return Err(self.fail(inner, &source.fingerprint, reason));
            }
        };
        let Some(decoder) = inner.decoder.as_mut() else {
            let reason = "decoder went away".to_string();
            return Err(self.fail(inner, &source.fingerprint, reason));
        };

        let decision = resolve_resume_offset(
            source.checkpoint.as_ref(),
            source.fingerprint.as_ref(),
            info.duration,
            shared.config.looping,
            shared.config.resume_policy,
            now_epoch_ms(),
        );
        decoder.seek(decision.offset_seconds);

        let next = if inner.active_captures > 0 || was_playing {
            match decoder.play() {
                Ok(()) => PlaybackState::Playing,
                Err(e) => {
                    warn!("Could not resume playback after load: {}", e);
                    PlaybackState::Ready
                }
            }
        } else {
            PlaybackState::Ready
        };

        inner.loaded = source.fingerprint.clone();
        inner.failed = None;
        inner.info = Some(info);
        if let Some(surface) = inner.surface.as_ref() {
            if surface.size()
                != crate::surface::fit_within(info.resolution, shared.config.surface_bounds)
            {
                debug!("Surface keeps its {} size for new media", surface.size());
            }
        }
        shared.set_state(next);

        info!(
            "Loaded video {} ({}, {:.1}s) at {:.2}s ({:?})",
            source.fingerprint.as_ref().map(|f| f.short()).unwrap_or("unknown"),
            info.resolution,
            info.duration,
            decision.offset_seconds,
            decision.reason
        );
        Ok(LoadOutcome::Loaded(decision))
    }

    fn fail(
        &self,
        inner: &mut Inner,
        source: &Option<Fingerprint>,
        reason: String,
    ) -> MediaError {
        error!("Video failed to decode: {}", reason);
        inner.loaded = None;
        inner.failed = source.clone();
        inner.info = None;
        self.shared.set_state(PlaybackState::Failed(reason.clone()));
        MediaError::DecodingFailed { reason }
    }

    /// Start playback, loading first if needed
    pub async fn play(&self) -> MediaResult<()> {
        self.ensure_loaded().await?;
        let mut inner = self.shared.inner.lock();
        let Some(decoder) = inner.decoder.as_mut() else {
            return Err(MediaError::InvalidState {
                message: "no decoder".to_string(),
            });
        };
        decoder.play()?;
        self.shared.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// Pause playback; a no-op when nothing is stored
    pub async fn pause(&self) -> MediaResult<()> {
        match self.ensure_loaded().await {
            Ok(()) => {}
            Err(MediaError::NoMedia) => return Ok(()),
            Err(e) => return Err(e),
        }
        let mut inner = self.shared.inner.lock();
        if let Some(decoder) = inner.decoder.as_mut() {
            decoder.pause();
        }
        if self.shared.state.borrow().is_loaded() {
            self.shared.set_state(PlaybackState::Paused);
        }
        Ok(())
    }

    /// Throttled position change used for remote seek and sync commands
    pub async fn seek(&self, time: f64) -> MediaResult<SeekOutcome> {
        let now = Instant::now();
        self.ensure_loaded().await?;
        let mut inner = self.shared.inner.lock();
        if !inner.throttle.try_acquire(now) {
            debug!("Seek to {:.2}s throttled", time);
            return Ok(SeekOutcome::Throttled);
        }
        Ok(SeekOutcome::Applied(Self::apply_seek(&mut inner, time)))
    }

    /// Throttled reconciliation to a producer's reported position
    ///
    /// Shares the throttle window with [`seek`](Self::seek).
    pub async fn sync(&self, time: f64) -> MediaResult<SeekOutcome> {
        let outcome = self.seek(time).await?;
        if let SeekOutcome::Applied(position) = outcome {
            debug!("Synced to {:.2}s", position);
        }
        Ok(outcome)
    }

    /// Unthrottled position change for local user input
    pub async fn seek_now(&self, time: f64) -> MediaResult<f64> {
        self.ensure_loaded().await?;
        let mut inner = self.shared.inner.lock();
        Ok(Self::apply_seek(&mut inner, time))
    }

    fn apply_seek(inner: &mut Inner, time: f64) -> f64 {
        let Some(decoder) = inner.decoder.as_mut() else {
            return 0.0;
        };
        if time.is_finite() {
            decoder.seek(time);
        }
        decoder.current_time()
    }

    /// Apply a decoder command received from another context
    ///
    /// `TurnOn` and `TurnOff` carry no playback action and are ignored here.
    pub async fn apply(&self, command: Command) -> MediaResult<()> {
        match command {
            Command::Play => self.play().await,
            Command::Pause => self.pause().await,
            Command::Seek { time } => self.seek(time).await.map(|_| ()),
            Command::Sync { time } => self.sync(time).await.map(|_| ()),
            Command::SourceChanged => self.reload().await.map(|_| ()),
            Command::TurnOn | Command::TurnOff => Ok(()),
        }
    }

    /// Hand out a capture stream drawn from the looping video
    ///
    /// The first capture creates the surface and the draw loop. Playback
    /// starts if it was paused; ending the last stream pauses it again.
    pub async fn acquire_capture(&self) -> MediaResult<MediaStream> {
        self.ensure_loaded().await?;

        let shared = &self.shared;
        let mut guard = shared.inner.lock();
        let inner = &mut *guard;
        let Some(info) = inner.info else {
            return Err(MediaError::NoMedia);
        };
        let bounds = shared.config.surface_bounds;
        let surface = inner
            .surface
            .get_or_insert_with(|| {
                let surface = SyntheticSurface::new(info.resolution, bounds);
                info!("Synthetic surface created at {}", surface.size());
                Arc::new(surface)
            })
            .clone();

        let Some(decoder) = inner.decoder.as_mut() else {
            return Err(MediaError::InvalidState {
                message: "no decoder".to_string(),
            });
        };
        if inner.draw_task.is_none() {
            let ticks = decoder.frame_ticks();
            if ticks.is_some() {
                debug!("Drawing on decoder frame callbacks");
            }
            inner.draw_task = Some(tokio::spawn(draw_loop(
                Arc::downgrade(shared),
                ticks,
                shared.config.frame_interval(),
            )));
        }
        if decoder.is_paused() {
            if let Err(e) = decoder.play() {
                warn!("Playback did not start: {}", e);
            }
        }
        if !decoder.is_paused() {
            shared.set_state(PlaybackState::Playing);
        }

        inner.active_captures += 1;
        info!("Virtual capture started ({} active)", inner.active_captures);

        let weak = Arc::downgrade(shared);
        Ok(surface.capture_stream(shared.config.fps, move || {
            if let Some(shared) = weak.upgrade() {
                shared.release_capture();
            }
        }))
    }

    /// Drop the loaded source after stored data was wiped
    ///
    /// Any in-flight load is invalidated. Live capture streams stay open and
    /// resume drawing once new media is loaded.
    pub fn reset(&self) {
        let mut inner = self.shared.inner.lock();
        inner.generation += 1;
        if let Some(decoder) = inner.decoder.as_mut() {
            decoder.pause();
            decoder.seek(0.0);
        }
        inner.loaded = None;
        inner.failed = None;
        inner.info = None;
        inner.throttle.reset();
        self.shared.set_state(PlaybackState::Uninitialized);
    }
}
