//! Integration tests for the playback coordinator
//!
//! All tests run on a paused clock so playback positions are deterministic.

use bytes::Bytes;
use loopcam_core::{DurableStore, MemoryEngine, Repository, ResumePolicy, ResumeReason, Schema};
use loopcam_media::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn repo() -> Repository {
    let store = DurableStore::open(MemoryEngine::shared(), Schema::default())
        .await
        .unwrap();
    Repository::new(store)
}

fn clip(seconds: u64, tag: &[u8]) -> Bytes {
    SimulatedMedia::new(160, 90, Duration::from_secs(seconds)).encode_with(tag)
}

fn coordinator_with(
    repo: Repository,
    factory: SimulatedDecoderFactory,
    config: PlaybackConfig,
) -> PlaybackCoordinator {
    PlaybackCoordinator::new(repo, Arc::new(factory), config).unwrap()
}

fn coordinator(repo: Repository) -> PlaybackCoordinator {
    coordinator_with(repo, SimulatedDecoderFactory::new(), PlaybackConfig::default())
}

/// Simulated decoders that count how often a source is handed to them
#[derive(Default)]
struct CountingFactory {
    sources: Arc<AtomicUsize>,
}

struct CountingDecoder {
    inner: Box<dyn VideoDecoder>,
    sources: Arc<AtomicUsize>,
}

impl DecoderFactory for CountingFactory {
    fn create(&self) -> Box<dyn VideoDecoder> {
        Box::new(CountingDecoder {
            inner: SimulatedDecoderFactory::new().create(),
            sources: self.sources.clone(),
        })
    }
}

impl VideoDecoder for CountingDecoder {
    fn set_source(&mut self, media: Bytes) {
        self.sources.fetch_add(1, Ordering::SeqCst);
        self.inner.set_source(media);
    }

    fn status(&self) -> tokio::sync::watch::Receiver<DecoderStatus> {
        self.inner.status()
    }

    fn play(&mut self) -> MediaResult<()> {
        self.inner.play()
    }

    fn pause(&mut self) {
        self.inner.pause();
    }

    fn seek(&mut self, seconds: f64) {
        self.inner.seek(seconds);
    }

    fn current_time(&self) -> f64 {
        self.inner.current_time()
    }

    fn duration(&self) -> f64 {
        self.inner.duration()
    }

    fn is_paused(&self) -> bool {
        self.inner.is_paused()
    }

    fn is_ended(&self) -> bool {
        self.inner.is_ended()
    }

    fn set_looping(&mut self, looping: bool) {
        self.inner.set_looping(looping);
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        self.inner.current_frame()
    }
}

// ============================================================================
// CAPTURE REFERENCE COUNTING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_last_capture_pauses_decoder() {
    let repo = repo().await;
    repo.replace_media(clip(30, b"a")).await.unwrap();
    let coordinator = coordinator(repo);

    let first = coordinator.acquire_capture().await.unwrap();
    let second = coordinator.acquire_capture().await.unwrap();
    let third = coordinator.acquire_capture().await.unwrap();
    assert_eq!(coordinator.active_captures(), 3);
    assert_eq!(coordinator.state(), PlaybackState::Playing);

    first.stop();
    drop(second);
    assert_eq!(coordinator.active_captures(), 1);
    assert!(coordinator.is_playing());

    third.stop();
    assert_eq!(coordinator.active_captures(), 0);
    assert_eq!(coordinator.state(), PlaybackState::Paused);

    // Position freezes once paused
    let frozen = coordinator.position();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(coordinator.position(), frozen);

    // Stopping twice does not underflow the count
    third.stop();
    assert_eq!(coordinator.active_captures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_capture_after_pause_restarts_playback() {
    let repo = repo().await;
    repo.replace_media(clip(30, b"a")).await.unwrap();
    let coordinator = coordinator(repo);

    drop(coordinator.acquire_capture().await.unwrap());
    assert_eq!(coordinator.state(), PlaybackState::Paused);

    let _stream = coordinator.acquire_capture().await.unwrap();
    assert_eq!(coordinator.state(), PlaybackState::Playing);
}

// ============================================================================
// DRAWING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_capture_stream_receives_fitted_frames() {
    let repo = repo().await;
    repo.replace_media(clip(30, b"a")).await.unwrap();
    let coordinator = coordinator(repo);

    let stream = coordinator.acquire_capture().await.unwrap();
    assert_eq!(stream.origin(), StreamOrigin::Synthetic);
    assert_eq!(stream.audio_tracks().count(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let surface = coordinator.surface().unwrap();
    assert_eq!(surface.size(), VideoResolution::new(640, 360));
    assert!(surface.frames_drawn() > 0);

    let track = stream.video_tracks().next().unwrap();
    let frame = track.latest_frame().unwrap();
    assert_eq!((frame.width, frame.height), (640, 360));
}

#[tokio::test(start_paused = true)]
async fn test_draw_loop_uses_frame_callbacks() {
    let repo = repo().await;
    repo.replace_media(clip(30, b"a")).await.unwrap();
    let coordinator = coordinator_with(
        repo,
        SimulatedDecoderFactory::new().with_frame_callbacks(),
        PlaybackConfig::default(),
    );

    let _stream = coordinator.acquire_capture().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(coordinator.surface().unwrap().frames_drawn() > 0);
}

#[tokio::test(start_paused = true)]
async fn test_single_surface_per_context() {
    let repo = repo().await;
    repo.replace_media(clip(30, b"a")).await.unwrap();
    let coordinator = coordinator(repo);

    let _a = coordinator.acquire_capture().await.unwrap();
    let first = coordinator.surface().unwrap();
    let _b = coordinator.acquire_capture().await.unwrap();
    assert!(Arc::ptr_eq(&first, &coordinator.surface().unwrap()));
}

#[tokio::test(start_paused = true)]
async fn test_non_looping_clip_pauses_at_end() {
    let repo = repo().await;
    repo.replace_media(clip(1, b"short")).await.unwrap();
    let coordinator = coordinator_with(
        repo,
        SimulatedDecoderFactory::new(),
        PlaybackConfig {
            looping: false,
            ..Default::default()
        },
    );

    let _stream = coordinator.acquire_capture().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(coordinator.state(), PlaybackState::Paused);
    assert_eq!(coordinator.position(), 1.0);
}

// ============================================================================
// CHECKPOINTS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_matching_checkpoint_is_applied() {
    let repo = repo().await;
    let fa = repo.replace_media(clip(30, b"a")).await.unwrap();
    repo.save_checkpoint(12.0, &fa).await.unwrap();

    let coordinator = coordinator_with(
        repo,
        SimulatedDecoderFactory::new(),
        PlaybackConfig {
            resume_policy: ResumePolicy::Exact,
            ..Default::default()
        },
    );
    match coordinator.reload().await.unwrap() {
        LoadOutcome::Loaded(decision) => {
            assert_eq!(decision.reason, ResumeReason::Exact);
            assert_eq!(decision.offset_seconds, 12.0);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(coordinator.position(), 12.0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_checkpoint_starts_from_zero() {
    let repo = repo().await;
    let fa = repo.replace_media(clip(30, b"a")).await.unwrap();
    repo.save_checkpoint(12.0, &fa).await.unwrap();
    repo.replace_media(clip(30, b"b")).await.unwrap();

    let coordinator = coordinator(repo);
    match coordinator.reload().await.unwrap() {
        LoadOutcome::Loaded(decision) => {
            assert_eq!(decision.reason, ResumeReason::StaleFingerprint);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(coordinator.position(), 0.0);
}

// ============================================================================
// RELOAD
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_check_for_update_reloads_changed_media() {
    let repo = repo().await;
    let fa = repo.replace_media(clip(30, b"a")).await.unwrap();
    let coordinator = coordinator(repo.clone());
    coordinator.ensure_loaded().await.unwrap();
    assert_eq!(coordinator.loaded_fingerprint(), Some(fa));
    assert!(!coordinator.check_for_update().await.unwrap());

    let fb = repo.replace_media(clip(30, b"b")).await.unwrap();
    assert!(coordinator.check_for_update().await.unwrap());
    assert_eq!(coordinator.loaded_fingerprint(), Some(fb));
}

#[tokio::test(start_paused = true)]
async fn test_reload_keeps_captures_playing() {
    let repo = repo().await;
    repo.replace_media(clip(30, b"a")).await.unwrap();
    let coordinator = coordinator(repo.clone());
    let _stream = coordinator.acquire_capture().await.unwrap();

    repo.replace_media(clip(20, b"b")).await.unwrap();
    coordinator.apply(loopcam_core::Command::SourceChanged).await.unwrap();
    assert_eq!(coordinator.state(), PlaybackState::Playing);
    assert_eq!(coordinator.duration(), 20.0);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_load_is_discarded() {
    let repo = repo().await;
    repo.replace_media(clip(30, b"a")).await.unwrap();
    let coordinator = coordinator_with(
        repo.clone(),
        SimulatedDecoderFactory::new().with_load_delay(Duration::from_millis(100)),
        PlaybackConfig::default(),
    );

    let background = coordinator.clone();
    let first = tokio::spawn(async move { background.reload().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(coordinator.state(), PlaybackState::Loading);

    let fb = repo.replace_media(clip(30, b"b")).await.unwrap();
    let second = coordinator.reload().await.unwrap();

    assert!(matches!(second, LoadOutcome::Loaded(_)));
    assert_eq!(first.await.unwrap().unwrap(), LoadOutcome::Superseded);
    assert_eq!(coordinator.loaded_fingerprint(), Some(fb));
    assert_eq!(coordinator.state(), PlaybackState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_failed_source_recovers_on_new_upload() {
    let repo = repo().await;
    repo.replace_media(Bytes::from_static(b"corrupt")).await.unwrap();
    let coordinator = coordinator(repo.clone());
    assert!(coordinator.ensure_loaded().await.is_err());
    assert!(matches!(coordinator.state(), PlaybackState::Failed(_)));

    repo.replace_media(clip(30, b"good")).await.unwrap();
    assert!(coordinator.check_for_update().await.unwrap());
    assert_eq!(coordinator.state(), PlaybackState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_failed_source_is_not_decoded_again() {
    let repo = repo().await;
    repo.replace_media(Bytes::from_static(b"corrupt")).await.unwrap();
    let factory = CountingFactory::default();
    let sources = factory.sources.clone();
    let coordinator =
        PlaybackCoordinator::new(repo.clone(), Arc::new(factory), PlaybackConfig::default())
            .unwrap();

    // Same sequence a consumer runs for every capture request
    for _ in 0..3 {
        assert!(!coordinator.check_for_update().await.unwrap());
        assert!(coordinator.acquire_capture().await.is_err());
    }
    assert_eq!(sources.load(Ordering::SeqCst), 1);
    assert!(matches!(coordinator.state(), PlaybackState::Failed(_)));

    repo.replace_media(clip(30, b"good")).await.unwrap();
    assert!(coordinator.check_for_update().await.unwrap());
    assert_eq!(sources.load(Ordering::SeqCst), 2);
}

// ============================================================================
// REMOTE COMMANDS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sync_and_seek_share_throttle() {
    let repo = repo().await;
    repo.replace_media(clip(30, b"a")).await.unwrap();
    let coordinator = coordinator(repo);

    coordinator
        .apply(loopcam_core::Command::Sync { time: 4.0 })
        .await
        .unwrap();
    coordinator
        .apply(loopcam_core::Command::Seek { time: 20.0 })
        .await
        .unwrap();
    assert_eq!(coordinator.position(), 4.0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    coordinator
        .apply(loopcam_core::Command::Seek { time: 20.0 })
        .await
        .unwrap();
    assert_eq!(coordinator.position(), 20.0);
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_seeks_applies_only_the_first() {
    let repo = repo().await;
    repo.replace_media(clip(30, b"a")).await.unwrap();
    let coordinator = coordinator(repo);
    coordinator.ensure_loaded().await.unwrap();

    // Ten seeks spread over 50ms
    let mut applied = Vec::new();
    for i in 0..10 {
        let outcome = coordinator.seek(10.0 + i as f64).await.unwrap();
        if let SeekOutcome::Applied(position) = outcome {
            applied.push(position);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(applied, vec![10.0]);
    assert_eq!(coordinator.position(), 10.0);
}

#[tokio::test(start_paused = true)]
async fn test_seeks_outside_the_window_both_apply() {
    let repo = repo().await;
    repo.replace_media(clip(30, b"a")).await.unwrap();
    let coordinator = coordinator(repo);
    coordinator.ensure_loaded().await.unwrap();

    assert_eq!(
        coordinator.seek(5.0).await.unwrap(),
        SeekOutcome::Applied(5.0)
    );
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        coordinator.seek(20.0).await.unwrap(),
        SeekOutcome::Applied(20.0)
    );
}

#[tokio::test(start_paused = true)]
async fn test_play_and_pause_commands() {
    let repo = repo().await;
    repo.replace_media(clip(30, b"a")).await.unwrap();
    let coordinator = coordinator(repo);

    coordinator.apply(loopcam_core::Command::Play).await.unwrap();
    assert!(coordinator.is_playing());
    tokio::time::sleep(Duration::from_secs(3)).await;
    coordinator.apply(loopcam_core::Command::Pause).await.unwrap();
    assert_eq!(coordinator.state(), PlaybackState::Paused);
    assert_eq!(coordinator.position(), 3.0);
}

#[tokio::test(start_paused = true)]
async fn test_tick_reports_end_without_captures() {
    let repo = repo().await;
    repo.replace_media(clip(2, b"short")).await.unwrap();
    let coordinator = coordinator_with(
        repo,
        SimulatedDecoderFactory::new(),
        PlaybackConfig {
            looping: false,
            ..Default::default()
        },
    );

    coordinator.play().await.unwrap();
    assert!(!coordinator.tick());
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(coordinator.tick());
    assert_eq!(coordinator.state(), PlaybackState::Paused);
    assert!(!coordinator.tick());
}
