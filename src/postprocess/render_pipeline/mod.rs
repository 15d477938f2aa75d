//! Named groups of passes attached to cameras as a unit.
//!
//! A [`PostProcessRenderEffect`] instantiates its passes per camera (or once, when
//! single-instance). A [`PostProcessRenderPipeline`] orders effects and attaches
//! them together; the [`PostProcessRenderPipelineManager`] owns a scene's pipelines
//! and revalidates them each frame.

pub mod bloom;
mod manager;
mod render_effect;
mod render_pipeline;

pub use self::bloom::{BloomConfig, BloomRatio, bloom_pipeline};
pub use self::manager::PostProcessRenderPipelineManager;
pub use self::render_effect::{CameraKey, PostProcessFactory, PostProcessRenderEffect};
pub use self::render_pipeline::PostProcessRenderPipeline;
