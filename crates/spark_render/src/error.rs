//! Render error taxonomy

use thiserror::Error;

use crate::handle::{Handle, ResourceKind};

#[derive(Debug, Error)]
pub enum RenderError {
    /// Window surface, adapter or device could not be brought up
    #[error("device initialization failed: {0}")]
    Initialization(String),

    /// The device rejected a resource description
    #[error("failed to create {kind} `{label}`: {reason}")]
    ResourceCreation {
        kind: ResourceKind,
        label: String,
        reason: String,
    },

    #[error("handle {0:?} does not refer to a live resource")]
    StaleHandle(Handle),

    #[error("{kind} `{label}` is still referenced by {dependents} live resource(s)")]
    StillReferenced {
        kind: ResourceKind,
        label: String,
        dependents: u32,
    },

    #[error("handle {handle:?} is a {actual}, expected a {expected}")]
    KindMismatch {
        handle: Handle,
        expected: ResourceKind,
        actual: ResourceKind,
    },

    #[error("cannot create `{0}`: registry is sealed for the frame loop")]
    RegistrySealed(String),

    #[error("invalid command stream: {0}")]
    InvalidCommands(String),

    #[error("invalid upload: {0}")]
    Upload(String),

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    #[error("buffer readback failed: {0}")]
    Readback(String),
}
