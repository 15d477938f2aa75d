//! Headless engine for tests and tooling.
//!
//! This engine doesn't touch a GPU. It keeps real handle tables, so released
//! handles become invalid exactly like on a device, and records every call so
//! callers can assert on draw order, binds, and resource lifetimes.

use std::collections::{HashMap, HashSet};

use glam::Vec4;
use slotmap::SlotMap;

use super::{
    AlphaMode, EffectDescriptor, EffectId, EffectStatus, Engine, FrameTarget, RenderTargetDescriptor,
    TextureId, UniformValue,
};
use crate::error::{EngineError, EngineResult};

/// A call observed by [`HeadlessEngine`].
#[derive(Clone, Debug, PartialEq)]
pub enum EngineCall {
    CreateRenderTarget { texture: TextureId, label: String, width: u32, height: u32 },
    ReleaseTexture(TextureId),
    CreateEffect { effect: EffectId, name: String },
    ReleaseEffect(EffectId),
    BindFramebuffer { target: FrameTarget, clear: Option<Vec4> },
    EnableEffect(EffectId),
    SetTexture { effect: EffectId, sampler: String, texture: TextureId },
    SetUniform { effect: EffectId, name: String, value: UniformValue },
    SetAlphaMode(AlphaMode),
    SetColorWrite(bool),
    Draw { effect: EffectId, target: FrameTarget },
    BeginFrame,
    EndFrame,
}

struct HeadlessTexture {
    descriptor: RenderTargetDescriptor,
}

struct HeadlessEffect {
    descriptor: EffectDescriptor,
    ready_at_frame: u64,
    failure: Option<String>,
    textures: HashMap<String, TextureId>,
    uniforms: HashMap<String, [f32; 4]>,
}

/// Recording engine with simulated compile latency, failures, and budgets.
///
/// # Example
///
/// ```
/// use strata::{Engine, EffectDescriptor, EffectStatus, HeadlessEngine};
///
/// let mut engine = HeadlessEngine::new(800, 600).with_compile_latency(1);
/// let effect = engine
///     .create_effect(&EffectDescriptor { name: "pass".into(), ..Default::default() })
///     .unwrap();
/// assert_eq!(engine.effect_status(effect), EffectStatus::Compiling);
/// engine.advance_frame();
/// assert_eq!(engine.effect_status(effect), EffectStatus::Ready);
/// ```
pub struct HeadlessEngine {
    width: u32,
    height: u32,
    max_texture_size: u32,
    stencil: bool,
    frame: u64,
    compile_latency: u64,
    failing_effects: HashSet<String>,
    texture_budget: Option<usize>,
    textures: SlotMap<TextureId, HeadlessTexture>,
    effects: SlotMap<EffectId, HeadlessEffect>,
    bound: Option<FrameTarget>,
    enabled_effect: Option<EffectId>,
    alpha_mode: AlphaMode,
    color_write: bool,
    calls: Vec<EngineCall>,
}

impl HeadlessEngine {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            max_texture_size: 4096,
            stencil: false,
            frame: 0,
            compile_latency: 0,
            failing_effects: HashSet::new(),
            texture_budget: None,
            textures: SlotMap::with_key(),
            effects: SlotMap::with_key(),
            bound: None,
            enabled_effect: None,
            alpha_mode: AlphaMode::Disabled,
            color_write: true,
            calls: Vec::new(),
        }
    }

    /// Effects report [`EffectStatus::Compiling`] for this many frames.
    pub fn with_compile_latency(mut self, frames: u64) -> Self {
        self.compile_latency = frames;
        self
    }

    pub fn with_max_texture_size(mut self, size: u32) -> Self {
        self.max_texture_size = size;
        self
    }

    pub fn with_stencil(mut self, enabled: bool) -> Self {
        self.stencil = enabled;
        self
    }

    /// Caps the number of live render targets; allocations beyond it fail.
    pub fn with_texture_budget(mut self, budget: usize) -> Self {
        self.texture_budget = Some(budget);
        self
    }

    /// Every effect created with this name fails to compile.
    pub fn fail_effect(&mut self, name: impl Into<String>) {
        self.failing_effects.insert(name.into());
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Moves the simulated clock forward one frame without recording a call.
    pub fn advance_frame(&mut self) {
        self.frame += 1;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Drops every resource as if the device context was lost.
    pub fn lose_device(&mut self) {
        log::debug!(
            "HeadlessEngine: device lost ({} textures, {} effects dropped)",
            self.textures.len(),
            self.effects.len()
        );
        self.textures.clear();
        self.effects.clear();
        self.bound = None;
        self.enabled_effect = None;
    }

    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Draw calls in submission order.
    pub fn draws(&self) -> Vec<(EffectId, FrameTarget)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::Draw { effect, target } => Some((*effect, *target)),
                _ => None,
            })
            .collect()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_effect_count(&self) -> usize {
        self.effects.len()
    }

    pub fn is_texture_alive(&self, texture: TextureId) -> bool {
        self.textures.contains_key(texture)
    }

    pub fn texture_label(&self, texture: TextureId) -> Option<&str> {
        self.textures.get(texture).map(|t| t.descriptor.label.as_str())
    }

    pub fn effect_name(&self, effect: EffectId) -> Option<&str> {
        self.effects.get(effect).map(|e| e.descriptor.name.as_str())
    }

    pub fn effect_descriptor(&self, effect: EffectId) -> Option<&EffectDescriptor> {
        self.effects.get(effect).map(|e| &e.descriptor)
    }

    pub fn bound_texture(&self, effect: EffectId, sampler: &str) -> Option<TextureId> {
        self.effects.get(effect)?.textures.get(sampler).copied()
    }

    pub fn uniform(&self, effect: EffectId, name: &str) -> Option<[f32; 4]> {
        self.effects.get(effect)?.uniforms.get(name).copied()
    }

    pub fn bound_framebuffer(&self) -> Option<FrameTarget> {
        self.bound
    }

    pub fn alpha_mode(&self) -> AlphaMode {
        self.alpha_mode
    }

    pub fn color_write(&self) -> bool {
        self.color_write
    }

    fn effect_mut(&mut self, effect: EffectId) -> EngineResult<&mut HeadlessEffect> {
        self.effects.get_mut(effect).ok_or(EngineError::UnknownEffect)
    }
}

impl Default for HeadlessEngine {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

impl Engine for HeadlessEngine {
    fn name(&self) -> &str {
        "Headless"
    }

    fn render_width(&self) -> u32 {
        self.width
    }

    fn render_height(&self) -> u32 {
        self.height
    }

    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn is_stencil_enabled(&self) -> bool {
        self.stencil
    }

    fn create_render_target(&mut self, descriptor: &RenderTargetDescriptor) -> EngineResult<TextureId> {
        if self.texture_budget.is_some_and(|budget| self.textures.len() >= budget) {
            return Err(EngineError::TextureAllocation {
                label: descriptor.label.clone(),
                width: descriptor.width,
                height: descriptor.height,
                reason: "texture budget exhausted".to_string(),
            });
        }
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.width.max(descriptor.height) > self.max_texture_size {
            return Err(EngineError::TextureAllocation {
                label: descriptor.label.clone(),
                width: descriptor.width,
                height: descriptor.height,
                reason: "size out of range".to_string(),
            });
        }

        log::trace!(
            "HeadlessEngine: creating render target {:?} ({}x{})",
            descriptor.label,
            descriptor.width,
            descriptor.height
        );
        let texture = self.textures.insert(HeadlessTexture {
            descriptor: descriptor.clone(),
        });
        self.calls.push(EngineCall::CreateRenderTarget {
            texture,
            label: descriptor.label.clone(),
            width: descriptor.width,
            height: descriptor.height,
        });
        Ok(texture)
    }

    fn release_texture(&mut self, texture: TextureId) {
        if self.textures.remove(texture).is_some() {
            self.calls.push(EngineCall::ReleaseTexture(texture));
        }
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures
            .get(texture)
            .map(|t| (t.descriptor.width, t.descriptor.height))
    }

    fn create_effect(&mut self, descriptor: &EffectDescriptor) -> EngineResult<EffectId> {
        log::trace!("HeadlessEngine: compiling effect {:?}", descriptor.name);
        let failure = self
            .failing_effects
            .contains(&descriptor.name)
            .then(|| format!("effect '{}' is not supported by this device", descriptor.name));
        let effect = self.effects.insert(HeadlessEffect {
            descriptor: descriptor.clone(),
            ready_at_frame: self.frame + self.compile_latency,
            failure,
            textures: HashMap::new(),
            uniforms: HashMap::new(),
        });
        self.calls.push(EngineCall::CreateEffect {
            effect,
            name: descriptor.name.clone(),
        });
        Ok(effect)
    }

    fn effect_status(&self, effect: EffectId) -> EffectStatus {
        match self.effects.get(effect) {
            None => EffectStatus::Unknown,
            Some(e) => match &e.failure {
                Some(message) => EffectStatus::Failed(message.clone()),
                None if self.frame >= e.ready_at_frame => EffectStatus::Ready,
                None => EffectStatus::Compiling,
            },
        }
    }

    fn release_effect(&mut self, effect: EffectId) {
        if self.effects.remove(effect).is_some() {
            if self.enabled_effect == Some(effect) {
                self.enabled_effect = None;
            }
            self.calls.push(EngineCall::ReleaseEffect(effect));
        }
    }

    fn bind_framebuffer(&mut self, target: FrameTarget, clear: Option<Vec4>) {
        self.bound = Some(target);
        self.calls.push(EngineCall::BindFramebuffer { target, clear });
    }

    fn enable_effect(&mut self, effect: EffectId) -> EngineResult<()> {
        if !self.effects.contains_key(effect) {
            return Err(EngineError::UnknownEffect);
        }
        self.enabled_effect = Some(effect);
        self.calls.push(EngineCall::EnableEffect(effect));
        Ok(())
    }

    fn set_texture(&mut self, effect: EffectId, sampler: &str, texture: TextureId) -> EngineResult<()> {
        if !self.textures.contains_key(texture) {
            return Err(EngineError::UnknownTexture);
        }
        self.effect_mut(effect)?
            .textures
            .insert(sampler.to_string(), texture);
        self.calls.push(EngineCall::SetTexture {
            effect,
            sampler: sampler.to_string(),
            texture,
        });
        Ok(())
    }

    fn set_uniform(&mut self, effect: EffectId, name: &str, value: UniformValue) -> EngineResult<()> {
        self.effect_mut(effect)?
            .uniforms
            .insert(name.to_string(), value.to_array());
        self.calls.push(EngineCall::SetUniform {
            effect,
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    fn set_alpha_mode(&mut self, mode: AlphaMode) {
        self.alpha_mode = mode;
        self.calls.push(EngineCall::SetAlphaMode(mode));
    }

    fn set_color_write(&mut self, enabled: bool) {
        self.color_write = enabled;
        self.calls.push(EngineCall::SetColorWrite(enabled));
    }

    fn draw_fullscreen_quad(&mut self) -> EngineResult<()> {
        let target = self.bound.ok_or(EngineError::NoFramebuffer)?;
        let effect = self.enabled_effect.ok_or(EngineError::UnknownEffect)?;
        let record = self.effects.get(effect).ok_or(EngineError::UnknownEffect)?;

        for sampler in record.descriptor.sampler_layout() {
            match record.textures.get(sampler) {
                Some(texture) if self.textures.contains_key(*texture) => {}
                _ => return Err(EngineError::UnboundSampler(sampler.to_string())),
            }
        }

        self.calls.push(EngineCall::Draw { effect, target });
        Ok(())
    }

    fn begin_frame(&mut self) -> EngineResult<()> {
        self.calls.push(EngineCall::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> EngineResult<()> {
        self.calls.push(EngineCall::EndFrame);
        self.frame += 1;
        Ok(())
    }
}
