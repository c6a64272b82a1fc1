//! # loopcam - a looping virtual camera
//!
//! loopcam replaces the feed returned by a camera capture request with a
//! pre-recorded video loop, and keeps that loop's position in agreement
//! across any number of independent execution contexts. There is no central
//! process: contexts share a durable key-value store and a best-effort
//! publish/subscribe bus, nothing else.
//!
//! ## Key Features
//!
//! - **Durable state**: enabled flag, current video and playback checkpoint
//!   survive restarts
//! - **Fingerprinted checkpoints**: a saved offset is only ever applied to
//!   the video it was taken on
//! - **Pass-through**: while disabled, capture requests reach the real
//!   device untouched
//! - **Shared decoding**: every stream in a context draws from one decoder,
//!   paused when the last stream ends
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use loopcam::{LoopCam, LoopCamConfig, MediaUpload, CaptureConstraints, MockPlatformCapture};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let loopcam = LoopCam::in_memory(LoopCamConfig::default()).await?;
//!
//!     // Control surface: store a video and switch the virtual camera on
//!     let producer = loopcam.producer().await?;
//!     producer.initialize().await?;
//!     producer.upload(MediaUpload::new("video/mp4", std::fs::read("loop.mp4")?)).await?;
//!     producer.enable().await?;
//!
//!     // Any other context: capture requests now get the loop
//!     let consumer = loopcam.consumer(Arc::new(MockPlatformCapture::new())).await?;
//!     let stream = consumer.get_user_media(CaptureConstraints::video_only()).await?;
//!     println!("Got {} tracks", stream.tracks().len());
//!
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use loopcam_core::{
    digest, BusEndpoint, Command, Delivery, DurableStore, ErrorCategory, FileEngine,
    Fingerprint, MemoryEngine, PlaybackCheckpoint, Repository, ResumeDecision, ResumePolicy,
    ResumeReason, StorageEngine, StoreError, SyncBus,
};

pub use loopcam_media::{
    CaptureConstraints, DecoderFactory, MediaError, MediaStream, MediaStreamTrack,
    MockPlatformCapture, PlatformCapture, PlaybackCoordinator, PlaybackState,
    SimulatedDecoderFactory, SimulatedMedia, StreamOrigin, TrackKind, VideoFrame,
    VideoResolution,
};

// Public API modules
pub mod config;
pub mod consumer;
pub mod context;
pub mod error;
pub mod event;
pub mod logging;
pub mod producer;

// Re-export main API types
pub use config::LoopCamConfig;
pub use consumer::ConsumerShim;
pub use context::{Context, ContextRole};
pub use error::{LoopCamError, LoopCamResult};
pub use event::{ProducerEvent, ProducerEvents};
pub use logging::init_logging;
pub use producer::{ConfirmPrompt, MediaUpload, Producer};

use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Main entry point for loopcam
///
/// One `LoopCam` stands for one installation: it owns the storage engine
/// and the bus hub that all of its contexts share.
#[derive(Clone)]
pub struct LoopCam {
    inner: Arc<LoopCamInner>,
}

struct LoopCamInner {
    config: LoopCamConfig,
    engine: Arc<dyn StorageEngine>,
    bus: SyncBus,
    decoders: Arc<dyn DecoderFactory>,
}

impl std::fmt::Debug for LoopCam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopCam")
            .field("db_name", &self.inner.config.db_name)
            .field("channel", &self.inner.config.channel_name)
            .finish()
    }
}

impl LoopCam {
    /// Start building an installation
    pub fn builder(config: LoopCamConfig) -> LoopCamBuilder {
        LoopCamBuilder::new(config)
    }

    /// Installation over an existing storage engine
    pub async fn with_engine(
        config: LoopCamConfig,
        engine: Arc<dyn StorageEngine>,
    ) -> LoopCamResult<Self> {
        Self::builder(config).engine(engine).build().await
    }

    /// Installation backed by process memory
    pub async fn in_memory(config: LoopCamConfig) -> LoopCamResult<Self> {
        Self::builder(config).build().await
    }

    /// Installation persisted under a directory
    pub async fn open_dir(config: LoopCamConfig, path: impl AsRef<Path>) -> LoopCamResult<Self> {
        let engine = FileEngine::open(path)?;
        Self::with_engine(config, Arc::new(engine)).await
    }

    /// Configuration
    pub fn config(&self) -> &LoopCamConfig {
        &self.inner.config
    }

    /// Bus hub shared by every context
    pub fn bus(&self) -> &SyncBus {
        &self.inner.bus
    }

    /// Storage engine shared by every context
    pub fn engine(&self) -> Arc<dyn StorageEngine> {
        self.inner.engine.clone()
    }

    /// Build the handles for a new execution context
    pub async fn context(&self, role: ContextRole) -> LoopCamResult<Context> {
        let config = self.inner.config.clone();
        let store = DurableStore::open(self.inner.engine.clone(), config.schema()).await?;
        let repo = Repository::new(store);
        let coordinator =
            PlaybackCoordinator::new(repo.clone(), self.inner.decoders.clone(), config.playback())?;
        let endpoint = self.inner.bus.join(&config.channel_name);
        let id = Uuid::new_v4();
        info!("Context {} started as {}", id, role);

        Ok(Context {
            id,
            role,
            config,
            repo,
            endpoint,
            coordinator,
        })
    }

    /// New producer context
    pub async fn producer(&self) -> LoopCamResult<Producer> {
        Ok(Producer::new(self.context(ContextRole::Producer).await?))
    }

    /// New consumer context intercepting requests that would reach `real`
    pub async fn consumer(&self, real: Arc<dyn PlatformCapture>) -> LoopCamResult<ConsumerShim> {
        ConsumerShim::install(self.context(ContextRole::Consumer).await?, real)
    }
}

/// Fluent builder for an installation
pub struct LoopCamBuilder {
    config: LoopCamConfig,
    engine: Option<Arc<dyn StorageEngine>>,
    bus: Option<SyncBus>,
    decoders: Option<Arc<dyn DecoderFactory>>,
}

impl LoopCamBuilder {
    fn new(config: LoopCamConfig) -> Self {
        Self {
            config,
            engine: None,
            bus: None,
            decoders: None,
        }
    }

    /// Use this storage engine instead of a fresh in-memory one
    pub fn engine(mut self, engine: Arc<dyn StorageEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Join an existing bus hub
    pub fn bus(mut self, bus: SyncBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Decoder backend
    pub fn decoders(mut self, decoders: Arc<dyn DecoderFactory>) -> Self {
        self.decoders = Some(decoders);
        self
    }

    /// Validate configuration, upgrade the store and build the installation
    pub async fn build(self) -> LoopCamResult<LoopCam> {
        self.config.validate()?;
        let engine = self.engine.unwrap_or_else(|| MemoryEngine::shared());
        let decoders = self
            .decoders
            .unwrap_or_else(|| Arc::new(SimulatedDecoderFactory::new()));

        let previous = engine.version().await?;
        engine.upgrade(&self.config.schema()).await?;
        if previous == 0 {
            info!(
                "Installed: created store {} v{}",
                self.config.db_name, self.config.schema_version
            );
        } else {
            info!(
                "Startup: opened store {} v{}",
                self.config.db_name, previous
            );
        }

        Ok(LoopCam {
            inner: Arc::new(LoopCamInner {
                config: self.config,
                engine,
                bus: self.bus.unwrap_or_default(),
                decoders,
            }),
        })
    }
}
