//! # loopcam media
//!
//! Playback side of the loopcam virtual camera. A [`PlaybackCoordinator`]
//! per execution context decodes the stored loop, keeps it positioned from
//! checkpoints and sync commands, and draws it onto a synthetic surface that
//! capture streams are derived from. Requests the virtual source does not
//! serve go to a [`PlatformCapture`] backend.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod surface;
pub mod throttle;
pub mod tracks;

// Re-export main types
pub use capture::{MockPlatformCapture, PlatformCapture};
pub use config::PlaybackConfig;
pub use coordinator::{LoadOutcome, PlaybackCoordinator, PlaybackState, SeekOutcome};
pub use decoder::{
    DecoderFactory, DecoderStatus, SimulatedDecoder, SimulatedDecoderFactory, SimulatedMedia,
    VideoDecoder, VideoInfo, VideoResolution,
};
pub use error::{MediaError, MediaResult};
pub use surface::{fit_within, scale_frame, SyntheticSurface, SYNTHETIC_TRACK_LABEL};
pub use throttle::SeekThrottle;
pub use tracks::{
    CaptureConstraints, MediaStream, MediaStreamTrack, StreamOrigin, TrackKind, VideoFrame,
};
