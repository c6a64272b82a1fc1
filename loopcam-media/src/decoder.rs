//! Video decoder abstraction
//!
//! A [`VideoDecoder`] exposes what the playback coordinator needs from a
//! media element: readiness, position control and the current frame. The
//! [`SimulatedDecoder`] backs headless contexts and tests with a clocked
//! container format ([`SimulatedMedia`]) that carries only dimensions,
//! duration and frame rate.

use crate::error::{MediaError, MediaResult};
use crate::tracks::VideoFrame;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Video resolution information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoResolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl VideoResolution {
    /// Create a resolution
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 1280x720
    pub const HD: Self = Self::new(1280, 720);
    /// 640x480
    pub const VGA: Self = Self::new(640, 480);

    /// Number of pixels
    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }

    /// Width over height
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// Whether either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for VideoResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Intrinsic properties of a decoded source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    /// Intrinsic dimensions
    pub resolution: VideoResolution,
    /// Duration in seconds
    pub duration: f64,
    /// Native frame rate
    pub frame_rate: f64,
}

/// Decoder readiness
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderStatus {
    /// No source set
    Idle,
    /// Source set, metadata pending
    Loading,
    /// Metadata known, frames available
    Ready(VideoInfo),
    /// Source could not be decoded
    Failed(String),
}

impl DecoderStatus {
    /// Whether loading has finished, successfully or not
    pub fn is_settled(&self) -> bool {
        matches!(self, DecoderStatus::Ready(_) | DecoderStatus::Failed(_))
    }
}

/// Media element controlled by the playback coordinator
///
/// Calls are synchronous; readiness is observed through [`status`].
///
/// [`status`]: VideoDecoder::status
pub trait VideoDecoder: Send {
    /// Replace the source; status goes to `Loading` immediately
    fn set_source(&mut self, media: Bytes);

    /// Readiness feed
    fn status(&self) -> watch::Receiver<DecoderStatus>;

    /// Start or resume playback
    fn play(&mut self) -> MediaResult<()>;

    /// Pause playback
    fn pause(&mut self);

    /// Move to an offset in seconds, clamped to the media
    fn seek(&mut self, seconds: f64);

    /// Current offset in seconds
    fn current_time(&self) -> f64;

    /// Duration in seconds, 0 when unknown
    fn duration(&self) -> f64;

    /// Whether playback is paused
    fn is_paused(&self) -> bool;

    /// Whether non-looping playback reached the end
    fn is_ended(&self) -> bool;

    /// Wrap to the start at the end of the media
    fn set_looping(&mut self, looping: bool);

    /// Frame at the current offset
    fn current_frame(&self) -> Option<VideoFrame>;

    /// Properties of the decoded source, once ready
    fn info(&self) -> Option<VideoInfo> {
        match &*self.status().borrow() {
            DecoderStatus::Ready(info) => Some(*info),
            _ => None,
        }
    }

    /// Per-frame presentation signal, when the decoder has one
    ///
    /// Draw loops fall back to a fixed timer when this returns `None`.
    fn frame_ticks(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}

/// Creates decoders on demand
pub trait DecoderFactory: Send + Sync {
    /// Create a fresh decoder
    fn create(&self) -> Box<dyn VideoDecoder>;
}

const SIMULATED_MAGIC: &[u8; 4] = b"LCAM";
const SIMULATED_HEADER_LEN: usize = 20;

/// Minimal container understood by [`SimulatedDecoder`]
///
/// Layout: magic `LCAM`, then little-endian u32 width, height, duration in
/// milliseconds and frame rate in millihertz, followed by an arbitrary
/// payload that only affects the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedMedia {
    /// Intrinsic dimensions
    pub resolution: VideoResolution,
    /// Clip length
    pub duration: Duration,
    /// Native frame rate
    pub frame_rate: f64,
}

impl SimulatedMedia {
    /// 30fps clip of the given size and length
    pub fn new(width: u32, height: u32, duration: Duration) -> Self {
        Self {
            resolution: VideoResolution::new(width, height),
            duration,
            frame_rate: 30.0,
        }
    }

    /// Encode with a payload that distinguishes otherwise equal clips
    pub fn encode_with(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(SIMULATED_HEADER_LEN + payload.len());
        buf.put_slice(SIMULATED_MAGIC);
        buf.put_u32_le(self.resolution.width);
        buf.put_u32_le(self.resolution.height);
        buf.put_u32_le(self.duration.as_millis().min(u32::MAX as u128) as u32);
        buf.put_u32_le((self.frame_rate * 1000.0).round() as u32);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Encode without payload
    pub fn encode(&self) -> Bytes {
        self.encode_with(&[])
    }

    /// Read the header back
    pub fn probe(bytes: &[u8]) -> MediaResult<VideoInfo> {
        if bytes.len() < SIMULATED_HEADER_LEN || &bytes[..4] != SIMULATED_MAGIC {
            return Err(MediaError::UnsupportedFormat {
                format: "missing LCAM header".to_string(),
            });
        }
        let field = |i: usize| {
            let start = 4 + i * 4;
            u32::from_le_bytes([
                bytes[start],
                bytes[start + 1],
                bytes[start + 2],
                bytes[start + 3],
            ])
        };
        let resolution = VideoResolution::new(field(0), field(1));
        let duration = field(2) as f64 / 1000.0;
        let frame_rate = field(3) as f64 / 1000.0;

        if resolution.is_empty() {
            return Err(MediaError::DecodingFailed {
                reason: format!("invalid dimensions {}", resolution),
            });
        }
        if duration <= 0.0 || frame_rate <= 0.0 {
            return Err(MediaError::DecodingFailed {
                reason: "empty clip".to_string(),
            });
        }
        Ok(VideoInfo {
            resolution,
            duration,
            frame_rate,
        })
    }
}

/// Decoder for [`SimulatedMedia`] clocked by the tokio timer
#[derive(Debug)]
pub struct SimulatedDecoder {
    status: Arc<watch::Sender<DecoderStatus>>,
    looping: bool,
    position: f64,
    anchor: Option<Instant>,
    load_delay: Duration,
    load_task: Option<JoinHandle<()>>,
    ticks: Option<broadcast::Sender<()>>,
    tick_task: Option<JoinHandle<()>>,
}

impl Default for SimulatedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDecoder {
    /// Decoder that becomes ready as soon as a source is set
    pub fn new() -> Self {
        let (status, _) = watch::channel(DecoderStatus::Idle);
        Self {
            status: Arc::new(status),
            looping: false,
            position: 0.0,
            anchor: None,
            load_delay: Duration::ZERO,
            load_task: None,
            ticks: None,
            tick_task: None,
        }
    }

    /// Delay metadata availability after each source change
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Emit a presentation signal for every frame of the clip
    pub fn with_frame_callbacks(mut self) -> Self {
        self.ticks = Some(broadcast::channel(8).0);
        self
    }

    fn raw_position(&self) -> f64 {
        match self.anchor {
            Some(anchor) => self.position + anchor.elapsed().as_secs_f64(),
            None => self.position,
        }
    }

    fn start_ticks(&mut self, frame_rate: f64) {
        let Some(ticks) = self.ticks.clone() else {
            return;
        };
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
        let period = Duration::from_secs_f64(1.0 / frame_rate.max(1.0));
        self.tick_task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                // No receivers is fine; the draw loop may not exist yet
                let _ = ticks.send(());
            }
        }));
    }
}

impl VideoDecoder for SimulatedDecoder {
    fn set_source(&mut self, media: Bytes) {
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        self.anchor = None;
        self.position = 0.0;
        self.status.send_replace(DecoderStatus::Loading);

        let outcome = match SimulatedMedia::probe(&media) {
            Ok(info) => DecoderStatus::Ready(info),
            Err(e) => {
                warn!("Simulated decoder rejected source: {}", e);
                DecoderStatus::Failed(e.to_string())
            }
        };
        if let DecoderStatus::Ready(info) = &outcome {
            self.start_ticks(info.frame_rate);
        }

        if self.load_delay.is_zero() {
            self.status.send_replace(outcome);
        } else {
            let status = self.status.clone();
            let delay = self.load_delay;
            self.load_task = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                status.send_replace(outcome);
            }));
        }
    }

    fn status(&self) -> watch::Receiver<DecoderStatus> {
        self.status.subscribe()
    }

    fn play(&mut self) -> MediaResult<()> {
        let Some(info) = self.info() else {
            return Err(MediaError::InvalidState {
                message: "no decoded source".to_string(),
            });
        };
        if self.anchor.is_some() && !self.is_ended() {
            return Ok(());
        }
        let mut position = self.current_time();
        if !self.looping && position >= info.duration {
            position = 0.0;
        }
        self.position = position;
        self.anchor = Some(Instant::now());
        debug!("Simulated decoder playing from {:.3}s", position);
        Ok(())
    }

    fn pause(&mut self) {
        self.position = self.current_time();
        self.anchor = None;
    }

    fn seek(&mut self, seconds: f64) {
        let duration = self.duration();
        let mut target = seconds.max(0.0);
        if duration > 0.0 {
            target = target.min(duration);
        }
        self.position = target;
        if self.anchor.is_some() {
            self.anchor = Some(Instant::now());
        }
    }

    fn current_time(&self) -> f64 {
        let raw = self.raw_position();
        let duration = self.duration();
        if duration <= 0.0 {
            return raw;
        }
        if self.looping {
            raw % duration
        } else {
            raw.min(duration)
        }
    }

    fn duration(&self) -> f64 {
        self.info().map(|i| i.duration).unwrap_or(0.0)
    }

    fn is_paused(&self) -> bool {
        self.anchor.is_none() || self.is_ended()
    }

    fn is_ended(&self) -> bool {
        let duration = self.duration();
        !self.looping && duration > 0.0 && self.raw_position() >= duration
    }

    fn set_looping(&mut self, looping: bool) {
        // Rebase so the switch does not jump the position
        self.position = self.current_time();
        if self.anchor.is_some() {
            self.anchor = Some(Instant::now());
        }
        self.looping = looping;
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        let info = self.info()?;
        let time = self.current_time();
        let frame_index = (time * info.frame_rate) as u64;
        let rgba = [
            (frame_index.wrapping_mul(37) % 256) as u8,
            (frame_index.wrapping_mul(101) % 256) as u8,
            (frame_index.wrapping_mul(17) % 256) as u8,
            255,
        ];
        Some(VideoFrame::solid(
            info.resolution.width,
            info.resolution.height,
            rgba,
            (time * 1000.0) as u64,
        ))
    }

    fn info(&self) -> Option<VideoInfo> {
        match &*self.status.borrow() {
            DecoderStatus::Ready(info) => Some(*info),
            _ => None,
        }
    }

    fn frame_ticks(&self) -> Option<broadcast::Receiver<()>> {
        self.ticks.as_ref().map(|tx| tx.subscribe())
    }
}

impl Drop for SimulatedDecoder {
    fn drop(&mut self) {
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
    }
}

/// Factory producing [`SimulatedDecoder`]s
#[derive(Debug, Clone, Default)]
pub struct SimulatedDecoderFactory {
    load_delay: Duration,
    frame_callbacks: bool,
}

impl SimulatedDecoderFactory {
    /// Decoders ready immediately, timer-driven drawing
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay metadata availability after each source change
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Decoders emit per-frame presentation signals
    pub fn with_frame_callbacks(mut self) -> Self {
        self.frame_callbacks = true;
        self
    }
}

impl DecoderFactory for SimulatedDecoderFactory {
    fn create(&self) -> Box<dyn VideoDecoder> {
        let mut decoder = SimulatedDecoder::new().with_load_delay(self.load_delay);
        if self.frame_callbacks {
            decoder = decoder.with_frame_callbacks();
        }
        Box::new(decoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(seconds: u64) -> Bytes {
        SimulatedMedia::new(64, 48, Duration::from_secs(seconds)).encode()
    }

    #[test]
    fn test_probe_header() {
        let info = SimulatedMedia::probe(&clip(30)).unwrap();
        assert_eq!(info.resolution, VideoResolution::new(64, 48));
        assert_eq!(info.duration, 30.0);
        assert_eq!(info.frame_rate, 30.0);

        assert!(SimulatedMedia::probe(b"not a video").is_err());
        let zero = SimulatedMedia::new(0, 48, Duration::from_secs(1)).encode();
        assert!(matches!(
            SimulatedMedia::probe(&zero),
            Err(MediaError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn test_payload_changes_bytes_only() {
        let media = SimulatedMedia::new(64, 48, Duration::from_secs(5));
        let a = media.encode_with(b"a");
        let b = media.encode_with(b"b");
        assert_ne!(a, b);
        assert_eq!(
            SimulatedMedia::probe(&a).unwrap(),
            SimulatedMedia::probe(&b).unwrap()
        );
    }

    #[test]
    fn test_failed_source() {
        let mut decoder = SimulatedDecoder::new();
        decoder.set_source(Bytes::from_static(b"garbage"));
        assert!(matches!(
            *decoder.status().borrow(),
            DecoderStatus::Failed(_)
        ));
        assert!(decoder.play().is_err());
        assert!(decoder.current_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clocked_playback_loops() {
        let mut decoder = SimulatedDecoder::new();
        decoder.set_looping(true);
        decoder.set_source(clip(10));
        decoder.seek(8.0);
        decoder.play().unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        let t = decoder.current_time();
        assert!((t - 1.0).abs() < 1e-6, "wrapped position {}", t);
        assert!(!decoder.is_ended());

        decoder.pause();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!((decoder.current_time() - 1.0).abs() < 1e-6);
        assert!(decoder.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_looping_ends() {
        let mut decoder = SimulatedDecoder::new();
        decoder.set_source(clip(2));
        decoder.play().unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(decoder.is_ended());
        assert!(decoder.is_paused());
        assert_eq!(decoder.current_time(), 2.0);

        // Playing again restarts from the top
        decoder.play().unwrap();
        assert_eq!(decoder.current_time(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_delay() {
        let mut decoder = SimulatedDecoder::new().with_load_delay(Duration::from_millis(50));
        let mut status = decoder.status();
        decoder.set_source(clip(4));
        assert_eq!(*status.borrow_and_update(), DecoderStatus::Loading);

        let settled = status.wait_for(|s| s.is_settled()).await.unwrap().clone();
        assert!(matches!(settled, DecoderStatus::Ready(_)));
    }

    #[test]
    fn test_seek_clamps() {
        let mut decoder = SimulatedDecoder::new();
        decoder.set_source(clip(10));
        decoder.seek(-4.0);
        assert_eq!(decoder.current_time(), 0.0);
        decoder.seek(99.0);
        assert_eq!(decoder.current_time(), 10.0);
    }
}
