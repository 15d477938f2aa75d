use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use glam::{Vec2, Vec4};
use indexmap::IndexMap;

use super::options::{PostProcessOptions, PostProcessSize};
use crate::camera::{Camera, CameraId};
use crate::engine::{
    AlphaMode, EffectDescriptor, EffectId, EffectStatus, Engine, FrameTarget, RenderTargetDescriptor, SamplingMode,
    ScaleMode, TextureId, TextureType, UniformValue, exponent_of_two,
};
use crate::error::{EngineResult, RenderError, RenderResult};
use crate::observable::Observable;

/// Shared handle to a post-process. Cameras, render effects, and aliasing passes hold these.
pub type PostProcessRef = Rc<RefCell<PostProcess>>;

/// Shader compilation state, polled from the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompileState {
    Uncompiled,
    Compiling,
    Ready,
    Failed(String),
}

/// Per-frame progress of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Inactive,
    Activated,
    Applied,
}

/// A uniform written on every [`PostProcess::apply`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformBinding {
    Value(UniformValue),
    /// `1 / width, 1 / height` of the pass output.
    TexelSize,
}

/// An extra texture input bound on every [`PostProcess::apply`].
#[derive(Clone, Debug)]
pub enum SamplerBinding {
    Texture(TextureId),
    /// The current input texture of another pass, e.g. the untouched scene color.
    PostProcessInput(Weak<RefCell<PostProcess>>),
}

/// Link from an aliasing pass to the pass whose output it reuses.
///
/// The lease is a clone of the owner's `output_lease`; the owner's alias count is
/// its strong count, so it drops as soon as the alias stops sharing or goes away.
#[derive(Clone, Debug)]
struct SharedOutput {
    owner: Weak<RefCell<PostProcess>>,
    _lease: Rc<()>,
}

type CompiledCallback = Box<dyn FnOnce(EffectId)>;
type ErrorCallback = Box<dyn FnOnce(&str)>;

/// Arguments of [`PostProcess::update_effect`]. `None` fields keep their current value.
#[derive(Default)]
pub struct EffectUpdate {
    pub defines: Option<Vec<String>>,
    pub uniforms: Option<Vec<String>>,
    pub samplers: Option<Vec<String>>,
    pub index_parameters: Option<HashMap<String, u32>>,
    pub on_compiled: Option<CompiledCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl EffectUpdate {
    pub fn defines<I, S>(mut self, defines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.defines = Some(defines.into_iter().map(Into::into).collect());
        self
    }

    pub fn index_parameters(mut self, parameters: HashMap<String, u32>) -> Self {
        self.index_parameters = Some(parameters);
        self
    }

    pub fn on_compiled(mut self, callback: impl FnOnce(EffectId) + 'static) -> Self {
        self.on_compiled = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&str) + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

/// A single full-screen shader pass.
///
/// The pass owns a ring of one texture (two when reusable). [`activate`](Self::activate)
/// binds the current ring texture as the framebuffer so the previous stage renders
/// into it; [`apply`](Self::apply) then samples that same texture as this pass's
/// input. Passes set up with [`share_output_with`](Self::share_output_with) allocate
/// nothing and use the owner's texture instead.
pub struct PostProcess {
    pub name: String,
    descriptor: EffectDescriptor,
    size: PostProcessSize,
    sampling_mode: SamplingMode,
    texture_type: TextureType,
    reusable: bool,
    pub alpha_mode: AlphaMode,
    pub auto_clear: bool,
    pub clear_color: Vec4,
    /// Render at the required size into a larger power-of-two target and scale the lookup.
    pub enable_pixel_perfect_mode: bool,
    pub always_force_pot: bool,
    pub scale_mode: ScaleMode,

    width: u32,
    height: u32,
    textures: Vec<TextureId>,
    depth_stencil: bool,
    current_render_texture_index: usize,
    activations: u64,
    texture_dirty: bool,
    share_output_with: Option<SharedOutput>,
    output_lease: Rc<()>,
    forced_output_texture: Option<TextureId>,
    scale_ratio: Vec2,
    texel_size: Vec2,
    uniform_bindings: IndexMap<String, UniformBinding>,
    sampler_bindings: IndexMap<String, SamplerBinding>,

    effect: Option<EffectId>,
    compile_state: CompileState,
    compile_requested: bool,
    on_compiled: Option<CompiledCallback>,
    on_error: Option<ErrorCallback>,
    frame_state: FrameState,
    cameras: HashSet<CameraId>,
    warned: bool,
    disposed: bool,

    /// Notified with the camera id each time the pass is activated.
    pub on_activate: Observable<CameraId>,
    /// Notified with the new `(width, height)` when the output is reallocated.
    pub on_size_changed: Observable<(u32, u32)>,
    /// Notified after inputs and uniforms are bound in [`apply`](Self::apply).
    pub on_apply: Observable<EffectId>,
    pub on_before_render: Observable<EffectId>,
    pub on_after_render: Observable<EffectId>,
}

impl PostProcess {
    /// Creates a pass from a WGSL fragment program and starts compiling it,
    /// unless `options.block_compilation` is set.
    pub fn new(
        engine: &mut dyn Engine,
        name: impl Into<String>,
        fragment: impl Into<String>,
        options: PostProcessOptions,
    ) -> Self {
        let name = name.into();
        let descriptor = EffectDescriptor {
            name: name.clone(),
            fragment: fragment.into(),
            defines: options.defines,
            uniforms: options.uniforms,
            samplers: options.samplers,
            index_parameters: options.index_parameters,
        };

        let mut post_process = Self {
            name,
            descriptor,
            size: options.size,
            sampling_mode: options.sampling_mode,
            texture_type: options.texture_type,
            reusable: options.reusable,
            alpha_mode: options.alpha_mode,
            auto_clear: options.auto_clear,
            clear_color: options.clear_color,
            enable_pixel_perfect_mode: false,
            always_force_pot: options.always_force_pot,
            scale_mode: options.scale_mode,
            width: 0,
            height: 0,
            textures: Vec::new(),
            depth_stencil: false,
            current_render_texture_index: 0,
            activations: 0,
            texture_dirty: false,
            share_output_with: None,
            output_lease: Rc::new(()),
            forced_output_texture: None,
            scale_ratio: Vec2::ONE,
            texel_size: Vec2::ZERO,
            uniform_bindings: IndexMap::new(),
            sampler_bindings: IndexMap::new(),
            effect: None,
            compile_state: CompileState::Uncompiled,
            compile_requested: false,
            on_compiled: None,
            on_error: None,
            frame_state: FrameState::Inactive,
            cameras: HashSet::new(),
            warned: false,
            disposed: false,
            on_activate: Observable::new(),
            on_size_changed: Observable::new(),
            on_apply: Observable::new(),
            on_before_render: Observable::new(),
            on_after_render: Observable::new(),
        };

        if !options.block_compilation {
            post_process.compile(engine);
        }
        post_process
    }

    pub fn into_ref(self) -> PostProcessRef {
        Rc::new(RefCell::new(self))
    }

    /// Output width. A pass sharing another pass's output reports the owner's.
    pub fn width(&self) -> u32 {
        self.shared_output_dimensions().map_or(self.width, |(w, _, _)| w)
    }

    pub fn height(&self) -> u32 {
        self.shared_output_dimensions().map_or(self.height, |(_, h, _)| h)
    }

    /// `1 / width, 1 / height` of the texture this pass renders from.
    pub fn texel_size(&self) -> Vec2 {
        self.shared_output_dimensions()
            .map_or(self.texel_size, |(_, _, texel)| texel)
    }

    fn shared_output_dimensions(&self) -> Option<(u32, u32, Vec2)> {
        let owner = self.share_output_with.as_ref()?.owner.upgrade()?;
        let owner = owner.try_borrow().ok()?;
        Some((owner.width(), owner.height(), owner.texel_size()))
    }

    pub fn scale_ratio(&self) -> Vec2 {
        self.scale_ratio
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    pub fn effect(&self) -> Option<EffectId> {
        self.effect
    }

    pub fn effect_descriptor(&self) -> &EffectDescriptor {
        &self.descriptor
    }

    pub fn compile_state(&self) -> &CompileState {
        &self.compile_state
    }

    pub fn frame_state(&self) -> FrameState {
        self.frame_state
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// False once compilation failed on this device.
    pub fn is_supported(&self) -> bool {
        !matches!(self.compile_state, CompileState::Failed(_))
    }

    /// Texture the pass currently reads from (and the previous stage renders into).
    pub fn input_texture(&self) -> Option<TextureId> {
        self.textures.get(self.current_render_texture_index).copied()
    }

    /// The other ring slot of a reusable pass: what its previous activation rendered into.
    pub fn previous_input_texture(&self) -> Option<TextureId> {
        if self.textures.len() < 2 {
            return None;
        }
        let previous = (self.current_render_texture_index + 1) % self.textures.len();
        self.textures.get(previous).copied()
    }

    pub fn textures(&self) -> &[TextureId] {
        &self.textures
    }

    pub fn cameras(&self) -> impl Iterator<Item = CameraId> + '_ {
        self.cameras.iter().copied()
    }

    /// Records that `camera` uses this pass. [`dispose`](Self::dispose) counts these.
    pub fn add_camera(&mut self, camera: CameraId) {
        self.cameras.insert(camera);
    }

    pub fn is_sharing_output(&self) -> bool {
        self.share_output_with.is_some()
    }

    /// Number of passes currently sharing this pass's output.
    pub fn alias_count(&self) -> usize {
        Rc::strong_count(&self.output_lease) - 1
    }

    /// The pass whose output this one reuses, if it is still alive.
    pub fn shared_output_owner(&self) -> Option<PostProcessRef> {
        self.share_output_with.as_ref()?.owner.upgrade()
    }

    /// Render into an externally owned texture instead of allocating one.
    pub fn set_forced_output_texture(&mut self, engine: &mut dyn Engine, texture: Option<TextureId>) {
        if texture.is_some() {
            self.release_textures(engine);
        }
        self.forced_output_texture = texture;
    }

    /// Forces reallocation on the next activation.
    pub fn mark_texture_dirty(&mut self) {
        self.texture_dirty = true;
    }

    pub fn set_uniform(&mut self, name: impl Into<String>, binding: UniformBinding) {
        self.uniform_bindings.insert(name.into(), binding);
    }

    pub fn set_sampler(&mut self, name: impl Into<String>, binding: SamplerBinding) {
        self.sampler_bindings.insert(name.into(), binding);
    }

    /// Replaces parts of the effect descriptor and recompiles.
    ///
    /// Compilation is not awaited. Readiness is observed by [`is_ready`](Self::is_ready),
    /// which also fires the callbacks once the outcome is known.
    pub fn update_effect(&mut self, engine: &mut dyn Engine, update: EffectUpdate) {
        if let Some(defines) = update.defines {
            self.descriptor.defines = defines;
        }
        if let Some(uniforms) = update.uniforms {
            self.descriptor.uniforms = uniforms;
        }
        if let Some(samplers) = update.samplers {
            self.descriptor.samplers = samplers;
        }
        if let Some(parameters) = update.index_parameters {
            self.descriptor.index_parameters = parameters;
        }
        self.on_compiled = update.on_compiled;
        self.on_error = update.on_error;
        self.compile(engine);
    }

    fn compile(&mut self, engine: &mut dyn Engine) {
        if let Some(old) = self.effect.take() {
            engine.release_effect(old);
        }
        self.warned = false;
        self.compile_requested = true;
        match engine.create_effect(&self.descriptor) {
            Ok(effect) => {
                log::debug!("Compiling post-process '{}'", self.name);
                self.effect = Some(effect);
                self.compile_state = CompileState::Compiling;
            }
            Err(err) => self.fail(err.to_string()),
        }
    }

    fn fail(&mut self, message: String) {
        if !self.warned {
            log::warn!("Post-process '{}' is not supported: {}", self.name, message);
            self.warned = true;
        }
        if let Some(callback) = self.on_error.take() {
            callback(&message);
        }
        self.on_compiled = None;
        self.compile_state = CompileState::Failed(message);
    }

    /// Polls the engine for the compile outcome.
    pub fn is_ready(&mut self, engine: &dyn Engine) -> bool {
        let Some(effect) = self.effect else {
            return false;
        };
        match engine.effect_status(effect) {
            EffectStatus::Ready => {
                if self.compile_state != CompileState::Ready {
                    log::debug!("Post-process '{}' ready", self.name);
                    self.compile_state = CompileState::Ready;
                    self.on_error = None;
                    if let Some(callback) = self.on_compiled.take() {
                        callback(effect);
                    }
                }
                true
            }
            EffectStatus::Compiling => {
                self.compile_state = CompileState::Compiling;
                false
            }
            EffectStatus::Failed(message) => {
                if !matches!(self.compile_state, CompileState::Failed(_)) {
                    self.fail(message);
                }
                false
            }
            EffectStatus::Unknown => {
                self.effect = None;
                self.compile_state = CompileState::Uncompiled;
                false
            }
        }
    }

    /// Makes this pass's output texture the current framebuffer.
    ///
    /// Returns the texture the caller must render into, or `None` if no texture
    /// could be provided this frame (allocation failure, a disposed owner).
    pub fn activate(
        &mut self,
        engine: &mut dyn Engine,
        camera: &Camera,
        source_texture: Option<TextureId>,
        force_depth_stencil: bool,
    ) -> Option<TextureId> {
        if self.disposed {
            return None;
        }

        let (base_width, base_height) = source_texture
            .and_then(|t| engine.texture_size(t))
            .unwrap_or((engine.render_width(), engine.render_height()));
        let max_size = engine.max_texture_size().max(1);

        let (required_width, required_height, mut desired_width, mut desired_height) = match self.size {
            PostProcessSize::Ratio(ratio) => {
                let w = ((base_width as f32 * ratio) as u32).max(1);
                let h = ((base_height as f32 * ratio) as u32).max(1);
                let (mut dw, mut dh) = (w, h);
                if self.sampling_mode.needs_mipmaps() || self.always_force_pot {
                    dw = exponent_of_two(dw, max_size, self.scale_mode);
                    dh = exponent_of_two(dh, max_size, self.scale_mode);
                }
                (w, h, dw, dh)
            }
            PostProcessSize::Fixed { width, height } => (width.max(1), height.max(1), width.max(1), height.max(1)),
        };
        desired_width = desired_width.min(max_size);
        desired_height = desired_height.min(max_size);

        if self.share_output_with.is_none() && self.forced_output_texture.is_none() {
            let stale = self.textures.iter().any(|t| engine.texture_size(*t).is_none());
            if self.textures.is_empty()
                || stale
                || self.texture_dirty
                || self.width != desired_width
                || self.height != desired_height
            {
                let first_in_chain = camera
                    .first_post_process()
                    .is_some_and(|p| std::ptr::eq(p.as_ptr(), self));
                if !self.allocate(engine, desired_width, desired_height, force_depth_stencil || first_in_chain) {
                    return None;
                }
            } else if self.reusable && self.activations > 0 {
                self.current_render_texture_index = (self.current_render_texture_index + 1) % self.textures.len();
            }
        }

        let target = match (&self.share_output_with, self.forced_output_texture) {
            (Some(shared), _) => shared
                .owner
                .upgrade()
                .and_then(|o| o.try_borrow().ok().and_then(|o| o.input_texture())),
            (None, Some(forced)) => {
                if let Some((w, h)) = engine.texture_size(forced) {
                    self.width = w;
                    self.height = h;
                }
                Some(forced)
            }
            (None, None) => self.input_texture(),
        };
        let Some(target) = target else {
            if !self.warned {
                log::warn!("Post-process '{}' has no output texture", self.name);
                self.warned = true;
            }
            return None;
        };

        self.scale_ratio = if self.enable_pixel_perfect_mode {
            Vec2::new(
                required_width as f32 / desired_width as f32,
                required_height as f32 / desired_height as f32,
            )
        } else {
            Vec2::ONE
        };

        let clear = (self.auto_clear && self.alpha_mode == AlphaMode::Disabled).then_some(self.clear_color);
        engine.bind_framebuffer(FrameTarget::Texture(target), clear);
        self.on_activate.notify(&camera.id());
        self.activations += 1;
        self.frame_state = FrameState::Activated;
        Some(target)
    }

    fn allocate(&mut self, engine: &mut dyn Engine, width: u32, height: u32, depth_stencil: bool) -> bool {
        self.release_textures(engine);

        let descriptor = RenderTargetDescriptor {
            label: self.name.clone(),
            width,
            height,
            sampling_mode: self.sampling_mode,
            texture_type: self.texture_type,
            generate_mipmaps: self.sampling_mode.needs_mipmaps(),
            generate_depth_buffer: depth_stencil,
            generate_stencil_buffer: depth_stencil && engine.is_stencil_enabled(),
        };
        let count = if self.reusable { 2 } else { 1 };
        for _ in 0..count {
            match engine.create_render_target(&descriptor) {
                Ok(texture) => self.textures.push(texture),
                Err(err) => {
                    if !self.warned {
                        log::warn!("Post-process '{}' could not allocate its output: {}", self.name, err);
                        self.warned = true;
                    }
                    self.release_textures(engine);
                    return false;
                }
            }
        }

        log::debug!("Post-process '{}' allocated {}x{}", self.name, width, height);
        self.width = width;
        self.height = height;
        self.depth_stencil = depth_stencil;
        self.texel_size = Vec2::new(1.0 / width as f32, 1.0 / height as f32);
        self.texture_dirty = false;
        self.current_render_texture_index = 0;
        self.activations = 0;
        self.on_size_changed.notify(&(width, height));
        true
    }

    fn release_textures(&mut self, engine: &mut dyn Engine) {
        for texture in self.textures.drain(..) {
            engine.release_texture(texture);
        }
        self.width = 0;
        self.height = 0;
        self.current_render_texture_index = 0;
    }

    /// Texture this pass reads in [`apply`](Self::apply); the one [`activate`](Self::activate) bound.
    fn source_texture(&self) -> Option<TextureId> {
        match (&self.share_output_with, self.forced_output_texture) {
            (Some(shared), _) => shared.owner.upgrade()?.try_borrow().ok()?.input_texture(),
            (None, Some(forced)) => Some(forced),
            (None, None) => self.input_texture(),
        }
    }

    /// Binds the pass's input and uniforms to its effect and returns the effect.
    ///
    /// Returns `None` when the pass was not activated this frame, the effect is
    /// not compiled, or an input texture is missing. The caller skips the draw.
    pub fn apply(&mut self, engine: &mut dyn Engine) -> Option<EffectId> {
        if self.frame_state != FrameState::Activated || !self.is_ready(engine) {
            return None;
        }
        let effect = self.effect?;
        let source = self
            .source_texture()
            .filter(|t| engine.texture_size(*t).is_some())?;

        if let Err(err) = self.bind_inputs(engine, effect, source) {
            if !self.warned {
                log::warn!("Post-process '{}' skipped: {}", self.name, err);
                self.warned = true;
            }
            return None;
        }

        self.on_apply.notify(&effect);
        self.frame_state = FrameState::Applied;
        Some(effect)
    }

    fn bind_inputs(&self, engine: &mut dyn Engine, effect: EffectId, source: TextureId) -> EngineResult<()> {
        engine.enable_effect(effect)?;
        engine.set_alpha_mode(self.alpha_mode);
        engine.set_texture(effect, EffectDescriptor::INPUT_SAMPLER, source)?;
        engine.set_uniform(effect, EffectDescriptor::SCALE_UNIFORM, UniformValue::Vec2(self.scale_ratio))?;

        for (name, binding) in &self.uniform_bindings {
            let value = match binding {
                UniformBinding::Value(value) => *value,
                UniformBinding::TexelSize => UniformValue::Vec2(self.texel_size()),
            };
            engine.set_uniform(effect, name, value)?;
        }

        for (name, binding) in &self.sampler_bindings {
            let texture = match binding {
                SamplerBinding::Texture(texture) => Some(*texture),
                SamplerBinding::PostProcessInput(other) => other
                    .upgrade()
                    .and_then(|o| o.try_borrow().ok().and_then(|o| o.input_texture())),
            };
            let texture = texture.ok_or_else(|| crate::error::EngineError::UnboundSampler(name.clone()))?;
            engine.set_texture(effect, name, texture)?;
        }
        Ok(())
    }

    /// Reuses `owner`'s output texture instead of allocating one.
    pub fn share_output_with(&mut self, engine: &mut dyn Engine, owner: &PostProcessRef) -> RenderResult<()> {
        if std::ptr::eq(owner.as_ptr(), self) {
            log::error!("Post-process '{}' cannot share output with itself", self.name);
            return Err(RenderError::InvalidConfiguration(format!(
                "post-process '{}' cannot share output with itself",
                self.name
            )));
        }
        let lease = owner
            .try_borrow()
            .map(|o| Rc::clone(&o.output_lease))
            .map_err(|_| RenderError::InvalidConfiguration(format!("post-process '{}' is in use", self.name)))?;

        self.use_own_output();
        self.release_textures(engine);
        self.share_output_with = Some(SharedOutput {
            owner: Rc::downgrade(owner),
            _lease: lease,
        });
        Ok(())
    }

    /// Stops sharing; the next activation allocates this pass's own texture.
    pub fn use_own_output(&mut self) {
        if self.share_output_with.take().is_some() {
            self.width = 0;
            self.height = 0;
        }
    }

    /// True when the engine no longer knows this pass's effect or textures,
    /// i.e. the device was lost and [`rebuild`](Self::rebuild) hasn't run yet.
    pub fn needs_rebuild(&self, engine: &dyn Engine) -> bool {
        if self.disposed {
            return false;
        }
        let effect_lost = match self.effect {
            Some(effect) => engine.effect_status(effect) == EffectStatus::Unknown,
            None => self.compile_requested && !matches!(self.compile_state, CompileState::Failed(_)),
        };
        effect_lost || self.textures.iter().any(|t| engine.texture_size(*t).is_none())
    }

    /// Recreates GPU state after a device loss: stale textures are replaced by
    /// fresh ones of the same size and the effect is recompiled.
    pub fn rebuild(&mut self, engine: &mut dyn Engine) {
        if self.disposed {
            return;
        }
        let (width, height) = (self.width, self.height);
        let had_textures = !self.textures.is_empty();
        self.release_textures(engine);
        self.frame_state = FrameState::Inactive;
        if self.compile_requested {
            self.compile(engine);
        }
        if had_textures {
            self.allocate(engine, width, height, self.depth_stencil);
        }
        log::debug!("Post-process '{}' rebuilt", self.name);
    }

    /// Releases this pass for `camera`, or for everyone with `None`.
    ///
    /// GPU resources go away once no camera uses the pass. Repeated calls are no-ops.
    pub fn dispose(&mut self, engine: &mut dyn Engine, camera: Option<CameraId>) {
        if self.disposed {
            return;
        }
        if let Some(camera) = camera {
            self.cameras.remove(&camera);
            if !self.cameras.is_empty() {
                return;
            }
        }

        let aliases = self.alias_count();
        if aliases > 0 {
            log::warn!(
                "Post-process '{}' disposed while {} pass(es) still share its output",
                self.name,
                aliases
            );
        }
        self.use_own_output();
        self.release_textures(engine);
        if let Some(effect) = self.effect.take() {
            engine.release_effect(effect);
        }
        self.cameras.clear();
        self.compile_state = CompileState::Uncompiled;
        self.frame_state = FrameState::Inactive;
        self.on_compiled = None;
        self.on_error = None;
        self.on_activate.clear();
        self.on_size_changed.clear();
        self.on_apply.clear();
        self.on_before_render.clear();
        self.on_after_render.clear();
        self.disposed = true;
        log::debug!("Post-process '{}' disposed", self.name);
    }
}

impl std::fmt::Debug for PostProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcess")
            .field("name", &self.name)
            .field("size", &(self.width, self.height))
            .field("textures", &self.textures)
            .field("compile_state", &self.compile_state)
            .field("frame_state", &self.frame_state)
            .field("disposed", &self.disposed)
            .finish()
    }
}
