//! [`Engine`] implementation on top of wgpu.
//!
//! Every draw records into its own command encoder and is submitted right away.
//! Uniform uploads go through `Queue::write_buffer`, which lands before the next
//! submission, so a pass drawn twice in a frame sees the values set for each draw.
//!
//! Render targets are single-level textures: mipmap generation is not performed,
//! and trilinear sampling falls back to bilinear filtering of level zero.

mod effect;
mod gpu;

use std::sync::Arc;

use glam::Vec4;
use slotmap::SlotMap;
use winit::window::Window;

use self::effect::{GpuEffect, PipelineKey};
pub use self::gpu::GpuContext;
use super::{
    AlphaMode, EffectDescriptor, EffectId, EffectStatus, Engine, FrameTarget, RenderTargetDescriptor,
    SamplingMode, TextureId, TextureType, UniformValue,
};
use crate::error::{EngineError, EngineResult};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

struct GpuTexture {
    #[allow(dead_code)]
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    depth: Option<wgpu::TextureView>,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    sampling_mode: SamplingMode,
}

struct Frame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

/// A GPU device presenting to a winit window.
pub struct WgpuEngine {
    gpu: GpuContext,
    textures: SlotMap<TextureId, GpuTexture>,
    effects: SlotMap<EffectId, GpuEffect>,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    frame: Option<Frame>,
    bound: Option<FrameTarget>,
    pending_clear: Option<Vec4>,
    enabled_effect: Option<EffectId>,
    alpha_mode: AlphaMode,
    color_write: bool,
}

impl WgpuEngine {
    pub fn new(window: Arc<Window>) -> EngineResult<Self> {
        Ok(Self::from_context(GpuContext::new(window)?))
    }

    pub fn from_context(gpu: GpuContext) -> Self {
        let linear_sampler = create_sampler(&gpu.device, wgpu::FilterMode::Linear);
        let nearest_sampler = create_sampler(&gpu.device, wgpu::FilterMode::Nearest);
        Self {
            gpu,
            textures: SlotMap::with_key(),
            effects: SlotMap::with_key(),
            linear_sampler,
            nearest_sampler,
            frame: None,
            bound: None,
            pending_clear: None,
            enabled_effect: None,
            alpha_mode: AlphaMode::Disabled,
            color_write: true,
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
    }

    /// Format of whatever is currently bound, for renderers creating their own pipelines.
    pub fn bound_format(&self) -> Option<wgpu::TextureFormat> {
        match self.bound? {
            FrameTarget::Screen => Some(self.gpu.config.format),
            FrameTarget::Texture(id) => self.textures.get(id).map(|t| t.format),
        }
    }

    /// Depth-stencil format of the bound framebuffer, if it has one.
    pub fn bound_depth_format(&self) -> Option<wgpu::TextureFormat> {
        match self.bound? {
            FrameTarget::Screen => None,
            FrameTarget::Texture(id) => self.textures.get(id)?.depth.as_ref().map(|_| DEPTH_FORMAT),
        }
    }

    /// Records a render pass on the bound framebuffer and submits it.
    ///
    /// A clear requested by the last [`Engine::bind_framebuffer`] is applied by this
    /// pass. Scene renderers use this to draw geometry with their own pipelines.
    pub fn encode_pass<F>(&mut self, label: &str, record: F) -> EngineResult<()>
    where
        F: FnOnce(&mut wgpu::RenderPass<'_>, &GpuContext),
    {
        let target = self.bound.ok_or(EngineError::NoFramebuffer)?;
        let (view, depth) = target_views(&self.textures, self.frame.as_ref(), target)?;
        let clear = self.pending_clear.take();

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(label),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: load_op(clear),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: if clear.is_some() {
                            wgpu::LoadOp::Clear(1.0)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: if clear.is_some() {
                            wgpu::LoadOp::Clear(0)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            record(&mut render_pass, &self.gpu);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn flush_pending_clear(&mut self) -> EngineResult<()> {
        if self.pending_clear.is_some() {
            self.encode_pass("Clear Pass", |_, _| {})?;
        }
        Ok(())
    }

    fn texture_format(&self, texture_type: TextureType) -> wgpu::TextureFormat {
        match texture_type {
            TextureType::UnsignedByte => self.gpu.config.format,
            // Rgba32Float is not filterable without an extra device feature.
            TextureType::HalfFloat | TextureType::Float => wgpu::TextureFormat::Rgba16Float,
        }
    }
}

impl Engine for WgpuEngine {
    fn name(&self) -> &str {
        "WebGPU"
    }

    fn render_width(&self) -> u32 {
        self.gpu.width()
    }

    fn render_height(&self) -> u32 {
        self.gpu.height()
    }

    fn max_texture_size(&self) -> u32 {
        self.gpu.limits.max_texture_dimension_2d
    }

    fn create_render_target(&mut self, descriptor: &RenderTargetDescriptor) -> EngineResult<TextureId> {
        let max = self.max_texture_size();
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.width.max(descriptor.height) > max {
            return Err(EngineError::TextureAllocation {
                label: descriptor.label.clone(),
                width: descriptor.width,
                height: descriptor.height,
                reason: format!("size must be within 1..={max}"),
            });
        }

        let format = self.texture_format(descriptor.texture_type);
        let size = wgpu::Extent3d {
            width: descriptor.width,
            height: descriptor.height,
            depth_or_array_layers: 1,
        };
        let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&descriptor.label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let depth = (descriptor.generate_depth_buffer || descriptor.generate_stencil_buffer).then(|| {
            self.gpu
                .device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some(&format!("{} Depth", descriptor.label)),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: DEPTH_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        });

        log::trace!(
            "Created render target '{}' ({}x{}, {:?})",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            format
        );
        Ok(self.textures.insert(GpuTexture {
            texture,
            view,
            depth,
            width: descriptor.width,
            height: descriptor.height,
            format,
            sampling_mode: descriptor.sampling_mode,
        }))
    }

    fn release_texture(&mut self, texture: TextureId) {
        if self.textures.remove(texture).is_some() {
            log::trace!("Released render target {:?}", texture);
        }
        if self.bound == Some(FrameTarget::Texture(texture)) {
            self.bound = None;
            self.pending_clear = None;
        }
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(texture).map(|t| (t.width, t.height))
    }

    fn create_effect(&mut self, descriptor: &EffectDescriptor) -> EngineResult<EffectId> {
        let effect = GpuEffect::compile(&self.gpu.device, descriptor);
        Ok(self.effects.insert(effect))
    }

    fn effect_status(&self, effect: EffectId) -> EffectStatus {
        self.effects
            .get(effect)
            .map_or(EffectStatus::Unknown, |e| e.status.clone())
    }

    fn release_effect(&mut self, effect: EffectId) {
        self.effects.remove(effect);
        if self.enabled_effect == Some(effect) {
            self.enabled_effect = None;
        }
    }

    fn bind_framebuffer(&mut self, target: FrameTarget, clear: Option<Vec4>) {
        if self.bound != Some(target) {
            if let Err(err) = self.flush_pending_clear() {
                log::warn!("Dropped pending clear: {}", err);
                self.pending_clear = None;
            }
        }
        self.bound = Some(target);
        self.pending_clear = clear;
    }

    fn enable_effect(&mut self, effect: EffectId) -> EngineResult<()> {
        if !self.effects.contains_key(effect) {
            return Err(EngineError::UnknownEffect);
        }
        self.enabled_effect = Some(effect);
        Ok(())
    }

    fn set_texture(&mut self, effect: EffectId, sampler: &str, texture: TextureId) -> EngineResult<()> {
        if !self.textures.contains_key(texture) {
            return Err(EngineError::UnknownTexture);
        }
        self.effects
            .get_mut(effect)
            .ok_or(EngineError::UnknownEffect)?
            .textures
            .insert(sampler.to_string(), texture);
        Ok(())
    }

    fn set_uniform(&mut self, effect: EffectId, name: &str, value: UniformValue) -> EngineResult<()> {
        self.effects
            .get_mut(effect)
            .ok_or(EngineError::UnknownEffect)?
            .set_uniform(name, value.to_array());
        Ok(())
    }

    fn set_alpha_mode(&mut self, mode: AlphaMode) {
        self.alpha_mode = mode;
    }

    fn set_color_write(&mut self, enabled: bool) {
        self.color_write = enabled;
    }

    fn draw_fullscreen_quad(&mut self) -> EngineResult<()> {
        let target = self.bound.ok_or(EngineError::NoFramebuffer)?;
        let effect_id = self.enabled_effect.ok_or(EngineError::UnknownEffect)?;
        let format = self.bound_format().ok_or(EngineError::UnknownTexture)?;
        let key = PipelineKey {
            format,
            alpha_mode: self.alpha_mode,
            color_write: self.color_write,
        };
        let clear = self.pending_clear.take();

        let Self {
            gpu,
            textures,
            effects,
            frame,
            linear_sampler,
            nearest_sampler,
            ..
        } = self;

        let (view, _) = target_views(textures, frame.as_ref(), target)?;
        let effect = effects.get_mut(effect_id).ok_or(EngineError::UnknownEffect)?;

        let mut inputs = Vec::new();
        for name in effect.descriptor.sampler_layout() {
            let texture = effect
                .textures
                .get(name)
                .and_then(|id| textures.get(*id))
                .ok_or_else(|| EngineError::UnboundSampler(name.to_string()))?;
            inputs.push(texture);
        }
        let sampler = match inputs.first().map(|t| t.sampling_mode) {
            Some(SamplingMode::Nearest) => &*nearest_sampler,
            _ => &*linear_sampler,
        };
        let views: Vec<&wgpu::TextureView> = inputs.iter().map(|t| &t.view).collect();

        effect.write_uniforms(&gpu.queue);
        let bind_group = effect.bind_group(&gpu.device, sampler, &views);
        let name = effect.descriptor.name.clone();
        let pipeline = effect
            .pipeline(&gpu.device, key)
            .ok_or_else(|| EngineError::ShaderCompilation {
                name,
                message: "effect has no usable pipeline".to_string(),
            })?;

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Effect Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Effect Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: load_op(clear),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn begin_frame(&mut self) -> EngineResult<()> {
        let surface_texture = match self.gpu.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.gpu.reconfigure();
                return Err(EngineError::Surface("surface lost, reconfigured".to_string()));
            }
            Err(err) => return Err(EngineError::Surface(err.to_string())),
        };
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.frame = Some(Frame { surface_texture, view });
        Ok(())
    }

    fn end_frame(&mut self) -> EngineResult<()> {
        self.flush_pending_clear()?;
        self.bound = None;
        if let Some(frame) = self.frame.take() {
            frame.surface_texture.present();
        }
        Ok(())
    }
}

fn target_views<'a>(
    textures: &'a SlotMap<TextureId, GpuTexture>,
    frame: Option<&'a Frame>,
    target: FrameTarget,
) -> EngineResult<(&'a wgpu::TextureView, Option<&'a wgpu::TextureView>)> {
    match target {
        FrameTarget::Screen => frame
            .map(|f| (&f.view, None))
            .ok_or_else(|| EngineError::Surface("no frame in flight".to_string())),
        FrameTarget::Texture(id) => textures
            .get(id)
            .map(|t| (&t.view, t.depth.as_ref()))
            .ok_or(EngineError::UnknownTexture),
    }
}

fn load_op(clear: Option<Vec4>) -> wgpu::LoadOp<wgpu::Color> {
    match clear {
        Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
            r: c.x as f64,
            g: c.y as f64,
            b: c.z as f64,
            a: c.w as f64,
        }),
        None => wgpu::LoadOp::Load,
    }
}

fn create_sampler(device: &wgpu::Device, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Effect Sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}
