//! Per-execution-context handles

use crate::config::LoopCamConfig;
use loopcam_core::{BusEndpoint, Repository};
use loopcam_media::PlaybackCoordinator;
use uuid::Uuid;

/// What kind of execution context a [`Context`] serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    /// The control surface that owns enable/disable, upload and seeking
    Producer,
    /// A context whose capture requests are intercepted
    Consumer,
}

impl std::fmt::Display for ContextRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextRole::Producer => write!(f, "producer"),
            ContextRole::Consumer => write!(f, "consumer"),
        }
    }
}

/// Everything one execution context owns
///
/// Each context opens the store on its own, joins the bus with its own
/// endpoint and has its own playback coordinator. Nothing here is shared
/// with other contexts except through the store and the bus.
#[derive(Debug)]
pub struct Context {
    pub(crate) id: Uuid,
    pub(crate) role: ContextRole,
    pub(crate) config: LoopCamConfig,
    pub(crate) repo: Repository,
    pub(crate) endpoint: BusEndpoint,
    pub(crate) coordinator: PlaybackCoordinator,
}

impl Context {
    /// Context id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Context role
    pub fn role(&self) -> ContextRole {
        self.role
    }

    /// Configuration the context was built with
    pub fn config(&self) -> &LoopCamConfig {
        &self.config
    }

    /// Typed store access
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Bus endpoint of this context
    pub fn endpoint(&self) -> &BusEndpoint {
        &self.endpoint
    }

    /// Playback coordinator of this context
    pub fn coordinator(&self) -> &PlaybackCoordinator {
        &self.coordinator
    }
}
