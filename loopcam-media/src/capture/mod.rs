//! Real capture mechanism behind the virtual source
//!
//! Requests the virtual source does not serve are forwarded unchanged to a
//! [`PlatformCapture`] backend.

use crate::error::{MediaError, MediaResult};
use crate::tracks::{CaptureConstraints, MediaStream, MediaStreamTrack, StreamOrigin, TrackKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Platform-specific capture backend
#[async_trait]
pub trait PlatformCapture: Send + Sync {
    /// Acquire a stream from real devices
    async fn get_user_media(&self, constraints: CaptureConstraints) -> MediaResult<MediaStream>;

    /// Backend name for logging
    fn name(&self) -> &str {
        "platform"
    }
}

/// Mock capture backend with canned devices
#[derive(Debug, Default)]
pub struct MockPlatformCapture {
    calls: AtomicUsize,
    last: Mutex<Option<CaptureConstraints>>,
    deny: bool,
}

impl MockPlatformCapture {
    /// Backend that grants every request
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that refuses every request
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// Number of requests seen
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Constraints of the most recent request
    pub fn last_constraints(&self) -> Option<CaptureConstraints> {
        *self.last.lock()
    }
}

#[async_trait]
impl PlatformCapture for MockPlatformCapture {
    async fn get_user_media(&self, constraints: CaptureConstraints) -> MediaResult<MediaStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(constraints);
        debug!("Mock capture request: {:?}", constraints);

        if self.deny {
            return Err(MediaError::PermissionDenied {
                operation: "getUserMedia".to_string(),
            });
        }
        if !constraints.video && !constraints.audio {
            return Err(MediaError::CaptureFailed {
                reason: "at least one of audio or video must be requested".to_string(),
            });
        }

        let mut tracks = Vec::new();
        if constraints.video {
            tracks.push(MediaStreamTrack::new(TrackKind::Video, "Mock Camera"));
        }
        if constraints.audio {
            tracks.push(MediaStreamTrack::new(TrackKind::Audio, "Mock Microphone"));
        }
        Ok(MediaStream::new(StreamOrigin::Platform, tracks))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_grants_requested_tracks() {
        let capture = MockPlatformCapture::new();
        let stream = capture
            .get_user_media(CaptureConstraints::audio_video())
            .await
            .unwrap();
        assert_eq!(stream.origin(), StreamOrigin::Platform);
        assert_eq!(stream.video_tracks().count(), 1);
        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(capture.calls(), 1);
        assert_eq!(
            capture.last_constraints(),
            Some(CaptureConstraints::audio_video())
        );
    }

    #[tokio::test]
    async fn test_mock_rejections() {
        let capture = MockPlatformCapture::new();
        assert!(capture
            .get_user_media(CaptureConstraints::default())
            .await
            .is_err());

        let denying = MockPlatformCapture::denying();
        let err = denying
            .get_user_media(CaptureConstraints::video_only())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::PermissionDenied { .. }));
    }
}
