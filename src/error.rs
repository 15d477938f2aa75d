//! Error types for engine resources and pipeline setup.
//!
//! The per-frame hot path (`activate`, `apply`, queue sorting) never returns
//! these; it folds failures into `Option` "not ready" signals. They surface
//! from setup calls such as attaching cameras or creating effects.

use thiserror::Error;

/// Errors raised by an [`Engine`](crate::Engine) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("failed to allocate render target '{label}' ({width}x{height}): {reason}")]
    TextureAllocation {
        label: String,
        width: u32,
        height: u32,
        reason: String,
    },
    #[error("failed to compile effect '{name}': {message}")]
    ShaderCompilation { name: String, message: String },
    #[error("unknown or released texture handle")]
    UnknownTexture,
    #[error("unknown or released effect handle")]
    UnknownEffect,
    #[error("sampler '{0}' has no texture bound")]
    UnboundSampler(String),
    #[error("no framebuffer is bound")]
    NoFramebuffer,
    #[error("surface error: {0}")]
    Surface(String),
    #[error("failed to acquire a GPU device: {0}")]
    DeviceRequest(String),
    #[error("feature not supported: {0}")]
    Unsupported(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while assembling or attaching post-process pipelines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("render effect '{effect}' failed to attach: {source}")]
    EffectAttach {
        effect: String,
        #[source]
        source: Box<RenderError>,
    },
    #[error("no render pipeline named '{0}'")]
    UnknownPipeline(String),
    #[error("no render effect named '{0}'")]
    UnknownEffect(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("'{0}' was already disposed")]
    Disposed(String),
}

pub type RenderResult<T> = Result<T, RenderError>;
