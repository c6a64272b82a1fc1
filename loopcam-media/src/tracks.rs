//! Media tracks and streams handed to capture requesters

use futures::stream::{self, Stream};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

/// Video frame representation
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Raw RGBA pixels
    pub data: Vec<u8>,
    /// Media timestamp in milliseconds
    pub timestamp: u64,
    /// Whether this is a keyframe
    pub is_keyframe: bool,
}

impl VideoFrame {
    /// Solid-colour RGBA frame
    pub fn solid(width: u32, height: u32, rgba: [u8; 4], timestamp: u64) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
            timestamp,
            is_keyframe: true,
        }
    }

    /// RGBA value at a pixel, if in bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.data.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Which capture devices a requester wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureConstraints {
    /// Video requested
    pub video: bool,
    /// Audio requested
    pub audio: bool,
}

impl CaptureConstraints {
    /// Video only
    pub fn video_only() -> Self {
        Self {
            video: true,
            audio: false,
        }
    }

    /// Audio only
    pub fn audio_only() -> Self {
        Self {
            video: false,
            audio: true,
        }
    }

    /// Audio and video
    pub fn audio_video() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

/// Track media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

/// Where a stream came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    /// Real capture device
    Platform,
    /// Drawn from the looping video
    Synthetic,
}

type EndedHook = Box<dyn FnOnce() + Send>;

/// A single audio or video track
///
/// Ending a track (explicitly via [`MediaStreamTrack::stop`] or by dropping
/// it) runs its ended hook exactly once.
pub struct MediaStreamTrack {
    id: String,
    kind: TrackKind,
    label: String,
    frame_rate: Option<f64>,
    frames: Option<watch::Receiver<Option<VideoFrame>>>,
    ended: AtomicBool,
    on_ended: Mutex<Option<EndedHook>>,
}

impl std::fmt::Debug for MediaStreamTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStreamTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl MediaStreamTrack {
    /// Create a live track
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            frame_rate: None,
            frames: None,
            ended: AtomicBool::new(false),
            on_ended: Mutex::new(None),
        }
    }

    /// Attach a frame feed
    pub fn with_frames(mut self, frames: watch::Receiver<Option<VideoFrame>>, fps: f64) -> Self {
        self.frames = Some(frames);
        self.frame_rate = Some(fps);
        self
    }

    /// Register the hook run when the track ends
    pub fn on_ended(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.on_ended.lock() = Some(Box::new(hook));
        self
    }

    /// Track id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Track kind
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Human readable label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Nominal frame rate of a video feed
    pub fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }

    /// Whether the track has ended
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// End the track
    pub fn stop(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Track {} ({}) ended", self.id, self.label);
        if let Some(hook) = self.on_ended.lock().take() {
            hook();
        }
    }

    /// Most recently drawn frame
    pub fn latest_frame(&self) -> Option<VideoFrame> {
        if self.is_ended() {
            return None;
        }
        self.frames.as_ref().and_then(|rx| rx.borrow().clone())
    }

    /// Stream of frames as they are drawn
    ///
    /// Intermediate frames are skipped when the reader falls behind.
    pub fn frames(&self) -> impl Stream<Item = VideoFrame> + Send + 'static {
        let rx = self.frames.clone();
        stream::unfold(rx, |rx| async move {
            let mut rx = rx?;
            loop {
                rx.changed().await.ok()?;
                let frame = rx.borrow_and_update().clone();
                if let Some(frame) = frame {
                    return Some((frame, Some(rx)));
                }
            }
        })
    }
}

impl Drop for MediaStreamTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A set of tracks returned from one capture request
#[derive(Debug)]
pub struct MediaStream {
    id: String,
    origin: StreamOrigin,
    tracks: Vec<MediaStreamTrack>,
}

impl MediaStream {
    /// Create a stream from tracks
    pub fn new(origin: StreamOrigin, tracks: Vec<MediaStreamTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            origin,
            tracks,
        }
    }

    /// Stream id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stream origin
    pub fn origin(&self) -> StreamOrigin {
        self.origin
    }

    /// All tracks
    pub fn tracks(&self) -> &[MediaStreamTrack] {
        &self.tracks
    }

    /// Video tracks
    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaStreamTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    /// Audio tracks
    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaStreamTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    /// Drop every audio track, ending it; returns how many were removed
    pub fn remove_audio_tracks(&mut self) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|t| t.kind() != TrackKind::Audio);
        before - self.tracks.len()
    }

    /// Whether any track is still live
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| !t.is_ended())
    }

    /// End every track
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
