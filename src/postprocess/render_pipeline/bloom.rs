//! Bloom: copy the scene, keep its highlights, blur them, add them back.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use glam::Vec2;

use super::render_effect::PostProcessRenderEffect;
use super::render_pipeline::PostProcessRenderPipeline;
use crate::engine::{SamplingMode, TextureType, UniformValue};
use crate::error::RenderError;
use crate::postprocess::{PostProcess, PostProcessOptions, PostProcessRef, UniformBinding, builtin};

pub const ORIGINAL_SCENE_COLOR_EFFECT: &str = "BloomOriginalSceneColorEffect";
pub const HIGHLIGHTS_EFFECT: &str = "BloomHighlightsEffect";
pub const BLUR_H_EFFECT: &str = "BloomBlurHEffect";
pub const BLUR_V_EFFECT: &str = "BloomBlurVEffect";
pub const COMBINE_EFFECT: &str = "BloomCombineEffect";

/// Output sizes of the bloom passes relative to the render size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BloomRatio {
    /// Size of the highlights pass.
    pub bloom_ratio: f32,
    /// Size of the two blur passes.
    pub blur_ratio: f32,
}

impl Default for BloomRatio {
    fn default() -> Self {
        Self {
            bloom_ratio: 0.5,
            blur_ratio: 0.25,
        }
    }
}

/// Configuration for [`bloom_pipeline`].
#[derive(Clone, Debug)]
pub struct BloomConfig {
    pub ratio: BloomRatio,
    /// Luminance above which a pixel contributes to the bloom.
    pub threshold: f32,
    /// Strength of the bloom added back onto the scene.
    pub weight: f32,
    /// Blur radius in texels.
    pub kernel: u32,
    pub texture_type: TextureType,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            ratio: BloomRatio::default(),
            threshold: 0.9,
            weight: 0.15,
            kernel: 16,
            texture_type: TextureType::HalfFloat,
        }
    }
}

impl BloomConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ratio(mut self, bloom_ratio: f32, blur_ratio: f32) -> Self {
        self.ratio = BloomRatio { bloom_ratio, blur_ratio };
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn kernel(mut self, kernel: u32) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn texture_type(mut self, texture_type: TextureType) -> Self {
        self.texture_type = texture_type;
        self
    }
}

/// Builds the five-effect bloom pipeline.
///
/// The effects are single-instance: every attached camera shares the same passes.
/// The combine pass samples the copy pass's input, the untouched scene color.
pub fn bloom_pipeline(name: impl Into<String>, config: BloomConfig) -> PostProcessRenderPipeline {
    let mut pipeline = PostProcessRenderPipeline::new(name);
    let original: Rc<RefCell<Weak<RefCell<PostProcess>>>> = Rc::new(RefCell::new(Weak::new()));

    let slot = Rc::clone(&original);
    let texture_type = config.texture_type;
    pipeline.add_effect(PostProcessRenderEffect::new(
        ORIGINAL_SCENE_COLOR_EFFECT,
        true,
        move |engine| {
            let options = PostProcessOptions::new().ratio(1.0).texture_type(texture_type);
            let copy = builtin::pass(engine, "bloomOriginalSceneColor", options).into_ref();
            *slot.borrow_mut() = Rc::downgrade(&copy);
            Ok(vec![copy])
        },
    ));

    let threshold = config.threshold;
    let bloom_ratio = config.ratio.bloom_ratio;
    pipeline.add_effect(PostProcessRenderEffect::new(HIGHLIGHTS_EFFECT, true, move |engine| {
        let options = PostProcessOptions::new()
            .ratio(bloom_ratio)
            .sampling_mode(SamplingMode::Bilinear)
            .texture_type(texture_type);
        Ok(vec![builtin::highlights(engine, "bloomHighlights", threshold, options).into_ref()])
    }));

    for (effect, pass, direction) in [
        (BLUR_H_EFFECT, "bloomBlurH", Vec2::X),
        (BLUR_V_EFFECT, "bloomBlurV", Vec2::Y),
    ] {
        let blur_ratio = config.ratio.blur_ratio;
        let kernel = config.kernel;
        pipeline.add_effect(PostProcessRenderEffect::new(effect, true, move |engine| {
            let options = PostProcessOptions::new()
                .ratio(blur_ratio)
                .sampling_mode(SamplingMode::Bilinear)
                .texture_type(texture_type);
            Ok(vec![builtin::blur(engine, pass, direction, kernel, options).into_ref()])
        }));
    }

    let weight = config.weight;
    pipeline.add_effect(PostProcessRenderEffect::new(COMBINE_EFFECT, true, move |engine| {
        let original = slot_owner(&original)?;
        let options = PostProcessOptions::new().ratio(1.0);
        Ok(vec![builtin::combine(engine, "bloomCombine", &original, weight, options).into_ref()])
    }));

    pipeline
}

fn slot_owner(slot: &RefCell<Weak<RefCell<PostProcess>>>) -> Result<PostProcessRef, RenderError> {
    slot.borrow().upgrade().ok_or_else(|| {
        RenderError::InvalidConfiguration("bloom combine needs the original scene color pass".to_string())
    })
}

fn bloom_pass(pipeline: &PostProcessRenderPipeline, effect: &str) -> Option<PostProcessRef> {
    pipeline.effect(effect)?.post_processes(None).into_iter().next()
}

/// Changes the highlight threshold of a pipeline built by [`bloom_pipeline`].
pub fn set_bloom_threshold(pipeline: &PostProcessRenderPipeline, threshold: f32) {
    if let Some(pp) = bloom_pass(pipeline, HIGHLIGHTS_EFFECT) {
        pp.borrow_mut()
            .set_uniform("threshold", UniformBinding::Value(UniformValue::Float(threshold)));
    }
}

/// Changes the bloom strength of a pipeline built by [`bloom_pipeline`].
pub fn set_bloom_weight(pipeline: &PostProcessRenderPipeline, weight: f32) {
    if let Some(pp) = bloom_pass(pipeline, COMBINE_EFFECT) {
        pp.borrow_mut()
            .set_uniform("weight", UniformBinding::Value(UniformValue::Float(weight)));
    }
}
