//! Compiled full-screen effects for the wgpu engine.
//!
//! An [`EffectDescriptor`] only carries a fragment program. The engine wraps it
//! with a generated prelude: compile-time constants, the full-screen vertex
//! stage, the uniform block, and one binding per sampler name.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::engine::{AlphaMode, EffectDescriptor, EffectStatus, TextureId};

/// Name of the filtering sampler shared by every texture binding.
pub(super) const SAMPLER_STATE: &str = "samplerState";

const VERTEX_STAGE: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4f,
    @location(0) uv: vec2f,
}

@vertex
fn vs(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var out: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    out.position = vec4f(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2f(x, 1.0 - y);
    return out;
}
"#;

/// Builds the complete WGSL module for an effect.
///
/// Defines of the form `"NAME value"` become `const NAME = value;`, bare flags
/// become `const NAME = true;`. Index parameters become `i32` constants.
pub(super) fn assemble_source(descriptor: &EffectDescriptor) -> String {
    let mut source = String::new();

    for define in &descriptor.defines {
        let define = define.trim().trim_start_matches("#define").trim();
        if define.is_empty() {
            continue;
        }
        match define.split_once(char::is_whitespace) {
            Some((name, value)) => {
                let _ = writeln!(source, "const {name} = {};", value.trim());
            }
            None => {
                let _ = writeln!(source, "const {define} = true;");
            }
        }
    }

    let mut parameters: Vec<_> = descriptor.index_parameters.iter().collect();
    parameters.sort();
    for (name, value) in parameters {
        let _ = writeln!(source, "const {name}: i32 = {value};");
    }

    source.push_str(VERTEX_STAGE);

    source.push_str("\nstruct Uniforms {\n");
    for name in descriptor.uniform_layout() {
        let _ = writeln!(source, "    {name}: vec4f,");
    }
    source.push_str("}\n\n");
    source.push_str("@group(0) @binding(0) var<uniform> u: Uniforms;\n");
    let _ = writeln!(source, "@group(0) @binding(1) var {SAMPLER_STATE}: sampler;");
    for (i, name) in descriptor.sampler_layout().iter().enumerate() {
        let _ = writeln!(source, "@group(0) @binding({}) var {name}: texture_2d<f32>;", i + 2);
    }
    source.push('\n');
    source.push_str(&descriptor.fragment);
    source
}

/// Render pipelines are created per output format and blend mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(super) struct PipelineKey {
    pub format: wgpu::TextureFormat,
    pub alpha_mode: AlphaMode,
    pub color_write: bool,
}

pub(super) struct GpuEffect {
    pub descriptor: EffectDescriptor,
    pub status: EffectStatus,
    pub textures: HashMap<String, TextureId>,
    module: Option<wgpu::ShaderModule>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_names: Vec<String>,
    uniforms: Vec<[f32; 4]>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl GpuEffect {
    /// Compiles the effect. Compilation errors end up in `status`, not in the return value.
    pub fn compile(device: &wgpu::Device, descriptor: &EffectDescriptor) -> Self {
        let source = assemble_source(descriptor);
        let label = format!("{} Shader", descriptor.name);

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let compile_error = pollster::block_on(device.pop_error_scope());

        let (module, status) = match compile_error {
            Some(error) => {
                log::warn!("Effect '{}' failed to compile: {}", descriptor.name, error);
                (None, EffectStatus::Failed(error.to_string()))
            }
            None => {
                log::debug!("Effect '{}' compiled", descriptor.name);
                (Some(module), EffectStatus::Ready)
            }
        };

        let uniform_names: Vec<String> = descriptor
            .uniform_layout()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut uniforms = vec![[0.0; 4]; uniform_names.len()];
        uniforms[0] = [1.0, 1.0, 0.0, 0.0];

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} Uniforms", descriptor.name)),
            size: (uniforms.len() * std::mem::size_of::<[f32; 4]>()) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut entries = vec![
            // Uniforms
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            // Sampler
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ];
        for i in 0..descriptor.sampler_layout().len() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: i as u32 + 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Bind Group Layout", descriptor.name)),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Pipeline Layout", descriptor.name)),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Self {
            descriptor: descriptor.clone(),
            status,
            textures: HashMap::new(),
            module,
            bind_group_layout,
            pipeline_layout,
            uniform_buffer,
            uniform_names,
            uniforms,
            pipelines: HashMap::new(),
        }
    }

    /// Stores a uniform value. Names the effect doesn't declare are ignored.
    pub fn set_uniform(&mut self, name: &str, value: [f32; 4]) {
        match self.uniform_names.iter().position(|n| n == name) {
            Some(index) => self.uniforms[index] = value,
            None => log::trace!("Effect '{}' has no uniform '{}'", self.descriptor.name, name),
        }
    }

    /// Uploads the current uniform values.
    pub fn write_uniforms(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&self.uniforms));
    }

    /// Returns the pipeline for `key`, creating it on first use.
    pub fn pipeline(&mut self, device: &wgpu::Device, key: PipelineKey) -> Option<&wgpu::RenderPipeline> {
        let module = self.module.as_ref()?;
        if !self.pipelines.contains_key(&key) {
            let write_mask = if key.color_write {
                wgpu::ColorWrites::ALL
            } else {
                wgpu::ColorWrites::empty()
            };
            device.push_error_scope(wgpu::ErrorFilter::Validation);
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&format!("{} Pipeline", self.descriptor.name)),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some("fs"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: key.format,
                        blend: blend_state(key.alpha_mode),
                        write_mask,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
            if let Some(error) = pollster::block_on(device.pop_error_scope()) {
                log::warn!("Effect '{}' pipeline creation failed: {}", self.descriptor.name, error);
                self.status = EffectStatus::Failed(error.to_string());
                self.module = None;
                return None;
            }
            self.pipelines.insert(key, pipeline);
        }
        self.pipelines.get(&key)
    }

    /// Creates a bind group for the given texture views, in sampler-layout order.
    pub fn bind_group(
        &self,
        device: &wgpu::Device,
        sampler: &wgpu::Sampler,
        views: &[&wgpu::TextureView],
    ) -> wgpu::BindGroup {
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: self.uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ];
        for (i, view) in views.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32 + 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Bind Group", self.descriptor.name)),
            layout: &self.bind_group_layout,
            entries: &entries,
        })
    }
}

fn blend_state(mode: AlphaMode) -> Option<wgpu::BlendState> {
    match mode {
        AlphaMode::Disabled => None,
        AlphaMode::Combine => Some(wgpu::BlendState::ALPHA_BLENDING),
        AlphaMode::PremultipliedAlpha => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
        AlphaMode::Add => Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::Zero,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        }),
        AlphaMode::Multiply => Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::Dst,
                dst_factor: wgpu::BlendFactor::Zero,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent::OVER,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_declares_constants_and_bindings() {
        let descriptor = EffectDescriptor {
            name: "blur".to_string(),
            fragment: "@fragment fn fs(in: VertexOutput) -> @location(0) vec4f { return vec4f(1.0); }".to_string(),
            defines: vec!["KERNEL 16".to_string(), "#define DITHER".to_string()],
            uniforms: vec!["direction".to_string()],
            samplers: vec!["originalColor".to_string()],
            index_parameters: HashMap::from([("SAMPLES".to_string(), 8)]),
        };
        let source = assemble_source(&descriptor);

        assert!(source.contains("const KERNEL = 16;"));
        assert!(source.contains("const DITHER = true;"));
        assert!(source.contains("const SAMPLES: i32 = 8;"));
        assert!(source.contains("    scale: vec4f,\n    direction: vec4f,"));
        assert!(source.contains("@group(0) @binding(2) var textureSampler: texture_2d<f32>;"));
        assert!(source.contains("@group(0) @binding(3) var originalColor: texture_2d<f32>;"));
        assert!(source.ends_with(&descriptor.fragment));
    }
}
