//! Synthetic drawing surface backing virtual capture streams
//!
//! Each playback context owns at most one surface. Decoded frames are
//! scaled onto it and every capture stream handed out reads from it.

use crate::decoder::VideoResolution;
use crate::tracks::{MediaStream, MediaStreamTrack, StreamOrigin, TrackKind, VideoFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Label carried by synthetic video tracks
pub const SYNTHETIC_TRACK_LABEL: &str = "loopcam";

/// Fit a source aspect ratio inside fixed bounds
///
/// Landscape and square sources keep the bound width; portrait sources keep
/// the bound height. The other side is rounded to the nearest pixel.
pub fn fit_within(source: VideoResolution, bounds: VideoResolution) -> VideoResolution {
    if source.is_empty() {
        return bounds;
    }
    let aspect = source.aspect_ratio();
    if aspect >= 1.0 {
        let height = (bounds.width as f64 / aspect).round().max(1.0) as u32;
        VideoResolution::new(bounds.width, height)
    } else {
        let width = (bounds.height as f64 * aspect).round().max(1.0) as u32;
        VideoResolution::new(width, bounds.height)
    }
}

/// Nearest-neighbour RGBA rescale
pub fn scale_frame(frame: &VideoFrame, target: VideoResolution) -> VideoFrame {
    if frame.width == target.width && frame.height == target.height {
        return frame.clone();
    }
    let mut data = Vec::with_capacity(target.pixel_count() as usize * 4);
    for y in 0..target.height {
        let sy = (y as u64 * frame.height as u64 / target.height.max(1) as u64) as usize;
        for x in 0..target.width {
            let sx = (x as u64 * frame.width as u64 / target.width.max(1) as u64) as usize;
            let offset = (sy * frame.width as usize + sx) * 4;
            match frame.data.get(offset..offset + 4) {
                Some(px) => data.extend_from_slice(px),
                None => data.extend_from_slice(&[0, 0, 0, 255]),
            }
        }
    }
    VideoFrame {
        width: target.width,
        height: target.height,
        data,
        timestamp: frame.timestamp,
        is_keyframe: frame.is_keyframe,
    }
}

/// Fixed-size surface frames are drawn onto
#[derive(Debug)]
pub struct SyntheticSurface {
    size: VideoResolution,
    frames: watch::Sender<Option<VideoFrame>>,
    frames_drawn: AtomicU64,
}

impl SyntheticSurface {
    /// Surface sized to fit `source` inside `bounds`
    pub fn new(source: VideoResolution, bounds: VideoResolution) -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            size: fit_within(source, bounds),
            frames,
            frames_drawn: AtomicU64::new(0),
        }
    }

    /// Surface dimensions
    pub fn size(&self) -> VideoResolution {
        self.size
    }

    /// Number of frames drawn so far
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn.load(Ordering::Relaxed)
    }

    /// Last drawn frame
    pub fn latest(&self) -> Option<VideoFrame> {
        self.frames.borrow().clone()
    }

    /// Draw a decoded frame scaled to the surface
    pub fn draw(&self, frame: &VideoFrame) {
        let scaled = scale_frame(frame, self.size);
        self.frames.send_replace(Some(scaled));
        self.frames_drawn.fetch_add(1, Ordering::Relaxed);
    }

    /// Derive a video-only capture stream at `fps`
    ///
    /// `on_ended` runs once when the stream's track ends.
    pub fn capture_stream(&self, fps: f64, on_ended: impl FnOnce() + Send + 'static) -> MediaStream {
        let track = MediaStreamTrack::new(TrackKind::Video, SYNTHETIC_TRACK_LABEL)
            .with_frames(self.frames.subscribe(), fps)
            .on_ended(on_ended);
        MediaStream::new(StreamOrigin::Synthetic, vec![track])
    }
}
