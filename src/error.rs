//! Error types shared by the scene, render list, device and pipeline layers.
//!
//! Every fallible public operation returns [`Result`]. Failures are logged at
//! the site where they are detected and then propagated, so callers always get
//! both a diagnostic line and a value they must check.

use crate::config::ConfigError;
use crate::device::ResourceId;

/// Errors raised by a [`RenderDevice`](crate::RenderDevice) while creating or
/// using GPU resources.
#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
    /// A shader program failed to compile or link.
    #[error("program '{label}' failed to build: {reason}")]
    ProgramBuild { label: String, reason: String },

    /// A texture could not be allocated.
    #[error("texture '{label}' could not be created: {reason}")]
    TextureCreate { label: String, reason: String },

    /// A framebuffer failed validation after its attachments were bound.
    #[error("framebuffer '{label}' is incomplete: {reason}")]
    FramebufferIncomplete { label: String, reason: String },

    /// A handle refers to a resource the device does not know about.
    #[error("unknown resource {0:?}")]
    UnknownResource(ResourceId),

    /// The presentation surface could not provide or present a frame.
    #[error("surface error: {0}")]
    Surface(String),
}

/// Top-level error for rendering operations.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// The caller handed in something unusable, such as an empty render list.
    /// No GPU state is touched when this is returned.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A GPU resource could not be built. The owning pipeline stays dirty and
    /// retries on the next render.
    #[error("resource build failed: {0}")]
    ResourceBuild(#[source] DeviceError),

    /// Rendering was attempted while a required collaborator is missing.
    #[error("invalid state: {0}")]
    State(String),

    /// Presenting the frame failed.
    #[error("presentation failed: {0}")]
    Surface(#[source] DeviceError),

    /// Configuration or scene description could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The GPU context could not be created.
    #[error("gpu initialization failed: {0}")]
    Gpu(String),

    /// The window or its event loop failed.
    #[error("window error: {0}")]
    Window(String),
}

/// Result alias used across the crate.
pub type Result<T, E = RenderError> = std::result::Result<T, E>;
