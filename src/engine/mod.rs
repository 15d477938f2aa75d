//! The device abstraction consumed by rendering groups and post-processes.
//!
//! The core never talks to a graphics API directly. It asks an [`Engine`] for
//! render targets, compiled effects, framebuffer binds, and full-screen quad draws,
//! always through handles ([`TextureId`], [`EffectId`]) that the engine owns.
//! A released handle stays invalid: lookups on it fail instead of aliasing a new
//! resource.
//!
//! Two implementations ship with the crate:
//!
//! - [`HeadlessEngine`]: records every call and simulates compilation latency,
//!   compile failures, and allocation budgets. Used by tests and tools.
//! - [`WgpuEngine`]: a real device backed by `wgpu`, presenting to a `winit` window.

mod headless;
mod wgpu_engine;

use std::collections::HashMap;

use glam::{Vec2, Vec3, Vec4};
use slotmap::new_key_type;

use crate::error::EngineResult;

pub use self::headless::{EngineCall, HeadlessEngine};
pub use self::wgpu_engine::{GpuContext, WgpuEngine};

new_key_type! {
    /// Handle to an engine-owned render target texture.
    pub struct TextureId;
    /// Handle to an engine-owned compiled shader program.
    pub struct EffectId;
}

/// Texture filtering used when a post-process output is sampled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SamplingMode {
    #[default]
    Nearest,
    Bilinear,
    /// Linear filtering with mipmaps; forces power-of-two targets.
    Trilinear,
}

impl SamplingMode {
    pub fn needs_mipmaps(self) -> bool {
        matches!(self, SamplingMode::Trilinear)
    }
}

/// Pixel storage of a render target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureType {
    #[default]
    UnsignedByte,
    HalfFloat,
    Float,
}

/// Blend mode applied when a full-screen pass is drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AlphaMode {
    #[default]
    Disabled,
    Combine,
    Add,
    Multiply,
    PremultipliedAlpha,
}

/// Parameters for [`Engine::create_render_target`].
#[derive(Clone, Debug, PartialEq)]
pub struct RenderTargetDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub sampling_mode: SamplingMode,
    pub texture_type: TextureType,
    pub generate_mipmaps: bool,
    pub generate_depth_buffer: bool,
    pub generate_stencil_buffer: bool,
}

/// Source and compile-time parameters of a full-screen effect.
///
/// `fragment` is a WGSL program defining `fn fs(in: VertexOutput) -> @location(0) vec4f`.
/// Each uniform name becomes a `vec4f` field of the `u` uniform struct and each
/// sampler name a `texture_2d<f32>` binding; a `scale` uniform and a
/// `textureSampler` binding are always present.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EffectDescriptor {
    pub name: String,
    pub fragment: String,
    pub defines: Vec<String>,
    pub uniforms: Vec<String>,
    pub samplers: Vec<String>,
    pub index_parameters: HashMap<String, u32>,
}

impl EffectDescriptor {
    pub const INPUT_SAMPLER: &'static str = "textureSampler";
    pub const SCALE_UNIFORM: &'static str = "scale";

    /// Uniform names in binding order, `scale` first and without duplicates.
    pub fn uniform_layout(&self) -> Vec<&str> {
        let mut layout = vec![Self::SCALE_UNIFORM];
        for name in &self.uniforms {
            if !layout.contains(&name.as_str()) {
                layout.push(name);
            }
        }
        layout
    }

    /// Sampler names in binding order, `textureSampler` first and without duplicates.
    pub fn sampler_layout(&self) -> Vec<&str> {
        let mut layout = vec![Self::INPUT_SAMPLER];
        for name in &self.samplers {
            if !layout.contains(&name.as_str()) {
                layout.push(name);
            }
        }
        layout
    }
}

/// Compilation state of an effect, as reported by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EffectStatus {
    Compiling,
    Ready,
    Failed(String),
    /// The handle was released or never existed.
    Unknown,
}

/// Value written to an effect uniform. Every uniform occupies one `vec4f` slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
}

impl UniformValue {
    pub fn to_array(self) -> [f32; 4] {
        match self {
            UniformValue::Float(x) => [x, 0.0, 0.0, 0.0],
            UniformValue::Vec2(v) => [v.x, v.y, 0.0, 0.0],
            UniformValue::Vec3(v) => [v.x, v.y, v.z, 0.0],
            UniformValue::Vec4(v) => v.to_array(),
        }
    }
}

/// Where draw calls land after [`Engine::bind_framebuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameTarget {
    Texture(TextureId),
    Screen,
}

/// GPU device capabilities consumed by the rendering core.
///
/// All calls happen on the render-loop thread. Compilation is never awaited:
/// [`create_effect`](Engine::create_effect) returns immediately and callers poll
/// [`effect_status`](Engine::effect_status) on later frames.
pub trait Engine {
    fn name(&self) -> &str;

    /// Width of the default framebuffer in pixels.
    fn render_width(&self) -> u32;

    /// Height of the default framebuffer in pixels.
    fn render_height(&self) -> u32;

    fn max_texture_size(&self) -> u32;

    /// Whether the default framebuffer carries a stencil buffer.
    fn is_stencil_enabled(&self) -> bool {
        false
    }

    fn create_render_target(&mut self, descriptor: &RenderTargetDescriptor) -> EngineResult<TextureId>;

    /// Releases a render target. Unknown handles are ignored.
    fn release_texture(&mut self, texture: TextureId);

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)>;

    /// Starts compiling an effect. The returned handle is valid immediately but may
    /// report [`EffectStatus::Compiling`] for several frames.
    fn create_effect(&mut self, descriptor: &EffectDescriptor) -> EngineResult<EffectId>;

    fn effect_status(&self, effect: EffectId) -> EffectStatus;

    /// Releases an effect. Unknown handles are ignored.
    fn release_effect(&mut self, effect: EffectId);

    /// Directs subsequent draws to `target`, optionally clearing it first.
    fn bind_framebuffer(&mut self, target: FrameTarget, clear: Option<Vec4>);

    /// Makes `effect` the program used by the next draw.
    fn enable_effect(&mut self, effect: EffectId) -> EngineResult<()>;

    fn set_texture(&mut self, effect: EffectId, sampler: &str, texture: TextureId) -> EngineResult<()>;

    fn set_uniform(&mut self, effect: EffectId, name: &str, value: UniformValue) -> EngineResult<()>;

    fn set_alpha_mode(&mut self, mode: AlphaMode);

    fn set_color_write(&mut self, enabled: bool);

    /// Draws a full-screen triangle with the enabled effect into the bound framebuffer.
    fn draw_fullscreen_quad(&mut self) -> EngineResult<()>;

    fn begin_frame(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn end_frame(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

/// Rounds `value` to a power of two no larger than `max`.
pub fn exponent_of_two(value: u32, max: u32, mode: ScaleMode) -> u32 {
    let value = value.max(1);
    let pot = match mode {
        ScaleMode::Floor => 1u32 << (31 - value.leading_zeros()),
        ScaleMode::Ceiling => value.next_power_of_two(),
        ScaleMode::Nearest => {
            let floor = 1u32 << (31 - value.leading_zeros());
            let ceiling = value.next_power_of_two();
            if value - floor < ceiling - value { floor } else { ceiling }
        }
    };
    pot.min(max)
}

/// Rounding rule used when a post-process must be resized to a power of two.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ScaleMode {
    #[default]
    Floor,
    Nearest,
    Ceiling,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_rounding() {
        assert_eq!(exponent_of_two(600, 4096, ScaleMode::Floor), 512);
        assert_eq!(exponent_of_two(600, 4096, ScaleMode::Ceiling), 1024);
        assert_eq!(exponent_of_two(600, 4096, ScaleMode::Nearest), 512);
        assert_eq!(exponent_of_two(900, 4096, ScaleMode::Nearest), 1024);
        assert_eq!(exponent_of_two(5000, 4096, ScaleMode::Ceiling), 4096);
        assert_eq!(exponent_of_two(0, 4096, ScaleMode::Floor), 1);
    }

    #[test]
    fn effect_layout_always_has_builtins_first() {
        let descriptor = EffectDescriptor {
            name: "combine".to_string(),
            uniforms: vec!["weight".to_string(), "scale".to_string()],
            samplers: vec!["originalColor".to_string()],
            ..Default::default()
        };
        assert_eq!(descriptor.uniform_layout(), vec!["scale", "weight"]);
        assert_eq!(descriptor.sampler_layout(), vec!["textureSampler", "originalColor"]);
    }
}
