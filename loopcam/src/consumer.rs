//! Consumer shim
//!
//! Sits in front of a context's real capture mechanism. Requests without
//! video, or made while the virtual camera is off, go to the real device
//! untouched. Everything else gets a stream drawn from the looping video.

use crate::context::{Context, ContextRole};
use crate::error::{LoopCamError, LoopCamResult};
use async_trait::async_trait;
use loopcam_core::{BusEndpoint, Command, Repository};
use loopcam_media::{
    CaptureConstraints, MediaError, MediaResult, MediaStream, PlatformCapture, PlaybackCoordinator,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capture interceptor for one consumer context
pub struct ConsumerShim {
    id: Uuid,
    repo: Repository,
    coordinator: PlaybackCoordinator,
    real: Arc<dyn PlatformCapture>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConsumerShim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerShim")
            .field("id", &self.id)
            .field("real", &self.real.name())
            .finish()
    }
}

impl ConsumerShim {
    /// Take over capture requests for a consumer context
    ///
    /// Starts listening on the bus right away; the decoder is only created
    /// once a capture or a playback command needs it.
    pub fn install(context: Context, real: Arc<dyn PlatformCapture>) -> LoopCamResult<Self> {
        if context.role == ContextRole::Producer {
            return Err(LoopCamError::Initialization {
                reason: "the producer's own context is never intercepted".to_string(),
            });
        }
        let Context {
            id,
            repo,
            endpoint,
            coordinator,
            ..
        } = context;
        let listener = tokio::spawn(listen(id, endpoint, coordinator.clone()));
        info!("Consumer {} intercepting {} capture", id, real.name());

        Ok(Self {
            id,
            repo,
            coordinator,
            real,
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Context id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Playback coordinator of this context
    pub fn coordinator(&self) -> &PlaybackCoordinator {
        &self.coordinator
    }

    /// Intercepted capture request
    ///
    /// The enabled flag is read from storage on every call.
    pub async fn get_user_media(
        &self,
        constraints: CaptureConstraints,
    ) -> LoopCamResult<MediaStream> {
        Ok(self.intercept(constraints).await?)
    }

    async fn intercept(&self, constraints: CaptureConstraints) -> MediaResult<MediaStream> {
        if !constraints.video {
            debug!("No video requested; passing through");
            return self.real.get_user_media(constraints).await;
        }
        if !self.repo.load_enabled().await {
            debug!("Virtual camera off; passing through");
            return self.real.get_user_media(constraints).await;
        }

        self.coordinator.check_for_update().await?;
        let stream = self.coordinator.acquire_capture().await?;
        info!(
            "Consumer {} serving virtual stream {} ({} active)",
            self.id,
            stream.id(),
            self.coordinator.active_captures()
        );
        Ok(stream)
    }

    /// Stop listening for commands
    ///
    /// Streams already handed out keep running until they are stopped.
    pub fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
            info!("Consumer {} stopped listening", self.id);
        }
    }
}

impl Drop for ConsumerShim {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

#[async_trait]
impl PlatformCapture for ConsumerShim {
    async fn get_user_media(&self, constraints: CaptureConstraints) -> MediaResult<MediaStream> {
        self.intercept(constraints).await
    }

    fn name(&self) -> &str {
        "loopcam"
    }
}

async fn listen(id: Uuid, mut endpoint: BusEndpoint, coordinator: PlaybackCoordinator) {
    while let Some(command) = endpoint.recv().await {
        match command {
            Command::TurnOn => info!("Virtual camera turned on"),
            Command::TurnOff => info!("Virtual camera turned off"),
            command => match coordinator.apply(command).await {
                Ok(()) => debug!("Consumer {} applied {}", id, command.kind()),
                Err(MediaError::NoMedia) => debug!("Ignoring {}: no video stored", command.kind()),
                Err(e) => warn!("Consumer {} failed to apply {}: {}", id, command.kind(), e),
            },
        }
    }
    debug!("Consumer {} bus closed", id);
}
