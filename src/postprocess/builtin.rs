//! Ready-made passes: copy, separable blur, highlight extraction, FXAA, and combine.
//!
//! Each constructor takes the caller's [`PostProcessOptions`] (size, sampling,
//! reuse) and adds the uniforms, samplers, and defines its shader needs.

use std::rc::Rc;

use glam::Vec2;

use super::options::PostProcessOptions;
use super::post_process::{EffectUpdate, PostProcess, PostProcessRef, SamplerBinding, UniformBinding};
use crate::engine::{Engine, UniformValue};

pub const PASS_FRAGMENT: &str = include_str!("shaders/pass.wgsl");
pub const BLUR_FRAGMENT: &str = include_str!("shaders/blur.wgsl");
pub const HIGHLIGHTS_FRAGMENT: &str = include_str!("shaders/highlights.wgsl");
pub const FXAA_FRAGMENT: &str = include_str!("shaders/fxaa.wgsl");
pub const COMBINE_FRAGMENT: &str = include_str!("shaders/combine.wgsl");

/// Copies its input unchanged.
pub fn pass(engine: &mut dyn Engine, name: &str, options: PostProcessOptions) -> PostProcess {
    PostProcess::new(engine, name, PASS_FRAGMENT, options)
}

fn kernel_define(kernel: u32) -> String {
    format!("KERNEL {}", kernel.max(1))
}

/// Gaussian blur along `direction` (`Vec2::X` or `Vec2::Y` for a separable pair).
pub fn blur(
    engine: &mut dyn Engine,
    name: &str,
    direction: Vec2,
    kernel: u32,
    options: PostProcessOptions,
) -> PostProcess {
    let options = options
        .uniforms(["direction", "texelSize"])
        .define(kernel_define(kernel));
    let mut post_process = PostProcess::new(engine, name, BLUR_FRAGMENT, options);
    post_process.set_uniform("direction", UniformBinding::Value(UniformValue::Vec2(direction)));
    post_process.set_uniform("texelSize", UniformBinding::TexelSize);
    post_process
}

/// Changes the tap radius of a pass built by [`blur`]. Recompiles the effect.
pub fn set_blur_kernel(post_process: &mut PostProcess, engine: &mut dyn Engine, kernel: u32) {
    let mut defines: Vec<String> = post_process
        .effect_descriptor()
        .defines
        .iter()
        .filter(|define| !define.starts_with("KERNEL"))
        .cloned()
        .collect();
    defines.push(kernel_define(kernel));
    post_process.update_effect(engine, EffectUpdate::default().defines(defines));
}

/// Keeps the part of each pixel brighter than `threshold` (luminance).
pub fn highlights(engine: &mut dyn Engine, name: &str, threshold: f32, options: PostProcessOptions) -> PostProcess {
    let options = options.uniforms(["threshold"]);
    let mut post_process = PostProcess::new(engine, name, HIGHLIGHTS_FRAGMENT, options);
    post_process.set_uniform("threshold", UniformBinding::Value(UniformValue::Float(threshold)));
    post_process
}

pub fn fxaa(engine: &mut dyn Engine, name: &str, options: PostProcessOptions) -> PostProcess {
    let options = options.uniforms(["texelSize"]);
    let mut post_process = PostProcess::new(engine, name, FXAA_FRAGMENT, options);
    post_process.set_uniform("texelSize", UniformBinding::TexelSize);
    post_process
}

/// Adds its input, scaled by `weight`, onto the input of `original`.
pub fn combine(
    engine: &mut dyn Engine,
    name: &str,
    original: &PostProcessRef,
    weight: f32,
    options: PostProcessOptions,
) -> PostProcess {
    let options = options.uniforms(["weight"]).samplers(["originalColor"]);
    let mut post_process = PostProcess::new(engine, name, COMBINE_FRAGMENT, options);
    post_process.set_uniform("weight", UniformBinding::Value(UniformValue::Float(weight)));
    post_process.set_sampler("originalColor", SamplerBinding::PostProcessInput(Rc::downgrade(original)));
    post_process
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::engine::HeadlessEngine;

    #[test]
    fn blur_declares_its_inputs() {
        let mut engine = HeadlessEngine::new(128, 128);
        let pp = blur(&mut engine, "blurH", Vec2::X, 8, PostProcessOptions::new().ratio(0.5));
        let descriptor = pp.effect_descriptor();
        assert_eq!(descriptor.defines, vec!["KERNEL 8"]);
        assert_eq!(descriptor.uniform_layout(), vec!["scale", "direction", "texelSize"]);
    }

    #[test]
    fn blur_kernel_change_recompiles() {
        let mut engine = HeadlessEngine::new(128, 128);
        let mut pp = blur(&mut engine, "blurV", Vec2::Y, 4, PostProcessOptions::new());
        let before = pp.effect();
        set_blur_kernel(&mut pp, &mut engine, 16);
        assert_eq!(pp.effect_descriptor().defines, vec!["KERNEL 16"]);
        assert_ne!(pp.effect(), before);
        assert_eq!(engine.live_effect_count(), 1);
    }

    #[test]
    fn blur_binds_direction_and_texel_size() {
        let mut engine = HeadlessEngine::new(128, 64);
        let camera = Camera::new("main");
        let mut pp = blur(&mut engine, "blurV", Vec2::Y, 4, PostProcessOptions::new().ratio(0.5));
        pp.activate(&mut engine, &camera, None, false);
        let effect = pp.apply(&mut engine).unwrap();
        assert_eq!(engine.uniform(effect, "direction"), Some([0.0, 1.0, 0.0, 0.0]));
        assert_eq!(engine.uniform(effect, "texelSize"), Some([1.0 / 64.0, 1.0 / 32.0, 0.0, 0.0]));
    }

    #[test]
    fn fragments_use_the_shared_prelude_names() {
        for fragment in [PASS_FRAGMENT, BLUR_FRAGMENT, HIGHLIGHTS_FRAGMENT, FXAA_FRAGMENT, COMBINE_FRAGMENT] {
            assert!(fragment.contains("fn fs(in: VertexOutput)"));
            assert!(fragment.contains("textureSampler"));
        }
    }
}
