//! The scene driver: an entity world and the per-frame rendering contract.
//!
//! Each frame, for every camera:
//! 1. rendering groups are reset and refilled with the visible entities,
//! 2. the camera's post-process chain redirects rendering into its first pass,
//! 3. groups render in ascending index,
//! 4. the chain runs into the camera's final target.

mod components;
#[allow(clippy::module_inception)]
mod scene;

pub use self::components::{Renderable, Transform, Visibility};
pub use self::scene::{CameraFrame, Scene};
