//! Full-screen post-processing.
//!
//! A [`PostProcess`] is one shader pass. A camera holds an ordered chain of them;
//! the [`PostProcessManager`] runs that chain each frame, each pass rendering into
//! the next pass's input texture and the last one into the camera's target.
//! [`render_pipeline`] groups passes into effects and pipelines that attach to
//! several cameras at once.

pub mod builtin;
mod options;
mod post_process;
mod post_process_manager;
pub mod render_pipeline;

pub use self::options::{PostProcessOptions, PostProcessSize};
pub use self::post_process::{
    CompileState, EffectUpdate, FrameState, PostProcess, PostProcessRef, SamplerBinding, UniformBinding,
};
pub use self::post_process_manager::PostProcessManager;
