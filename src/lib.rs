//! # Strata
//!
//! **Rendering-group ordering and post-process pipelines for real-time 3D scenes.**
//!
//! Strata sits between a scene and a GPU. Each frame, visible submeshes are
//! bucketed into numbered rendering groups and drawn stage by stage (depth-only,
//! opaque, alpha-test, particles, transparent, edges, sprites). The result then
//! flows through the camera's chain of full-screen post-processes, whose render
//! targets are allocated lazily, resized on demand and optionally shared between
//! passes.
//!
//! ## Quick Start
//!
//! ```
//! use strata::postprocess::render_pipeline::{BloomConfig, bloom_pipeline};
//! use strata::scene::Scene;
//! use strata::{Camera, HeadlessEngine};
//!
//! let mut engine = HeadlessEngine::new(800, 600);
//! let mut scene = Scene::new();
//! let camera = scene.add_camera(Camera::new("main"));
//!
//! scene
//!     .pipeline_manager
//!     .add_pipeline(bloom_pipeline("bloom", BloomConfig::new().weight(0.3)));
//! scene
//!     .pipeline_manager
//!     .attach_cameras_to_render_pipeline(&mut engine, "bloom", &[camera], false)
//!     .unwrap();
//! ```
//!
//! ## Layout
//!
//! - [`rendering`]: rendering groups, their queues, and sort policies.
//! - [`postprocess`]: single passes, the per-frame chain driver, and named
//!   multi-pass pipelines such as bloom.
//! - [`engine`]: the device capability the core draws through, with a headless
//!   recorder for tests and a `wgpu` implementation.
//! - [`scene`]: an ECS-backed driver that runs the whole frame for every camera.

mod camera;
pub mod engine;
mod error;
mod observable;
pub mod postprocess;
pub mod rendering;
pub mod scene;

pub use camera::{Camera, CameraId, CameraRef};
pub use engine::{
    AlphaMode, EffectDescriptor, EffectId, EffectStatus, Engine, FrameTarget, GpuContext, HeadlessEngine,
    RenderTargetDescriptor, SamplingMode, ScaleMode, TextureId, TextureType, UniformValue, WgpuEngine,
};
pub use error::{EngineError, EngineResult, RenderError, RenderResult};
pub use observable::{Observable, ObserverToken};

pub use glam;
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
