//! Orbiting discs rendered through rendering groups and a bloom pipeline.
//!
//! Controls: `B` toggles bloom, `Escape` quits.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use glam::{Mat4, Quat, Vec3, Vec4};
use wgpu::util::DeviceExt;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use strata::postprocess::render_pipeline::{BloomConfig, bloom_pipeline};
use strata::rendering::{GroupRenderer, Material, MaterialId, Mesh, MeshId, QueuedSubMesh, RenderStage, SortPolicy, SubMesh};
use strata::scene::{Renderable, Scene, Transform};
use strata::{Camera, CameraRef, EngineError, EngineResult, WgpuEngine};

const BLOOM: &str = "bloom";

/// Configuration for the demo window.
struct AppConfig {
    title: String,
    width: u32,
    height: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Strata".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

impl AppConfig {
    fn new() -> Self {
        Self::default()
    }

    fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Circular motion around the Y axis.
#[derive(Clone, Copy, Debug)]
struct Orbit {
    radius: f32,
    speed: f32,
    phase: f32,
    height: f32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Globals {
    view_proj: [[f32; 4]; 4],
    right: [f32; 4],
    up: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DiscInstance {
    center: [f32; 3],
    radius: f32,
    color: [f32; 4],
}

impl DiscInstance {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32, 2 => Float32x4];

    const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<DiscInstance>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes: &Self::ATTRIBUTES,
    };
}

/// Draws every queued submesh as a camera-facing disc.
///
/// Draws are recorded while the groups render and flushed into one pass on the
/// bound framebuffer. Depth testing is off, so group and queue order decide
/// what ends up on top.
struct DiscRenderer {
    colors: HashMap<MaterialId, Vec4>,
    radii: HashMap<MeshId, f32>,
    instances: Vec<DiscInstance>,
    globals: Globals,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    pipelines: HashMap<(wgpu::TextureFormat, Option<wgpu::TextureFormat>), wgpu::RenderPipeline>,
}

impl DiscRenderer {
    fn new() -> Self {
        Self {
            colors: HashMap::new(),
            radii: HashMap::new(),
            instances: Vec::new(),
            globals: Globals {
                view_proj: Mat4::IDENTITY.to_cols_array_2d(),
                right: [1.0, 0.0, 0.0, 0.0],
                up: [0.0, 1.0, 0.0, 0.0],
            },
            bind_group_layout: None,
            pipelines: HashMap::new(),
        }
    }

    fn style(&mut self, mesh: &Mesh, material: &Material, radius: f32, color: Vec4) {
        self.radii.insert(mesh.id(), radius);
        self.colors.insert(material.id(), color.with_w(material.alpha));
    }

    fn begin(&mut self, camera: &Camera, aspect: f32) {
        self.instances.clear();
        self.globals = Globals {
            view_proj: camera.view_projection(aspect).to_cols_array_2d(),
            right: camera.right().extend(0.0).to_array(),
            up: camera.orthogonal_up().extend(0.0).to_array(),
        };
    }

    fn flush(&mut self, engine: &mut WgpuEngine) -> EngineResult<()> {
        let color_format = engine.bound_format().ok_or(EngineError::NoFramebuffer)?;
        let depth_format = engine.bound_depth_format();
        let instance_count = self.instances.len() as u32;

        let gpu = engine.gpu();
        let layout: &wgpu::BindGroupLayout = self
            .bind_group_layout
            .get_or_insert_with(|| create_bind_group_layout(&gpu.device));
        let globals = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Disc Globals"),
            contents: bytemuck::bytes_of(&self.globals),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Disc Bind Group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: globals.as_entire_binding(),
            }],
        });
        let instances = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Disc Instances"),
            contents: bytemuck::cast_slice(&self.instances),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let pipeline: &wgpu::RenderPipeline = self
            .pipelines
            .entry((color_format, depth_format))
            .or_insert_with(|| create_pipeline(&gpu.device, layout, color_format, depth_format));

        engine.encode_pass("Disc Pass", |render_pass, _| {
            if instance_count == 0 {
                return;
            }
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.set_vertex_buffer(0, instances.slice(..));
            render_pass.draw(0..6, 0..instance_count);
        })
    }
}

impl GroupRenderer for DiscRenderer {
    fn render_sub_mesh(&mut self, _stage: RenderStage, sub_mesh: &QueuedSubMesh) {
        let Some(material) = sub_mesh.sub_mesh.material.as_ref() else {
            return;
        };
        let color = self.colors.get(&material.id()).copied().unwrap_or(Vec4::ONE);
        let radius = self.radii.get(&sub_mesh.mesh().id()).copied().unwrap_or(0.5);
        self.instances.push(DiscInstance {
            center: sub_mesh.world_center.to_array(),
            radius,
            color: color.to_array(),
        });
    }
}

fn create_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Disc Bind Group Layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

fn create_pipeline(
    device: &wgpu::Device,
    bind_group_layout: &wgpu::BindGroupLayout,
    color_format: wgpu::TextureFormat,
    depth_format: Option<wgpu::TextureFormat>,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Disc Shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("shaders/discs.wgsl").into()),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Disc Pipeline Layout"),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Disc Pipeline"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs"),
            buffers: &[DiscInstance::LAYOUT],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs"),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::Always,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Fills the world: a ring of opaque discs, translucent discs drifting through
/// them, and a bright marker in rendering group 1 drawn over everything.
fn populate(scene: &mut Scene, renderer: &mut DiscRenderer) {
    // Painter's order within the ring: depth testing is off.
    scene.rendering_manager.set_rendering_order(
        0,
        SortPolicy::back_to_front(),
        SortPolicy::back_to_front(),
        SortPolicy::default_transparent(),
    );

    for i in 0..12 {
        let hue = i as f32 / 12.0;
        let mesh = Arc::new(Mesh::new(format!("ring{i}")));
        let material = Material::new(format!("ring{i}"));
        renderer.style(&mesh, &material, 0.45, palette(hue).extend(1.0));
        spawn(
            scene,
            mesh,
            material,
            Orbit {
                radius: 3.0,
                speed: 0.4,
                phase: hue * std::f32::consts::TAU,
                height: 0.0,
            },
        );
    }

    for i in 0..4 {
        let mesh = Arc::new(Mesh::new(format!("glass{i}")).with_alpha_index(i));
        let material = Material::new(format!("glass{i}")).with_alpha(0.45);
        renderer.style(&mesh, &material, 0.9, Vec4::new(0.6, 0.8, 1.0, 1.0));
        spawn(
            scene,
            mesh,
            material,
            Orbit {
                radius: 1.8,
                speed: -0.7,
                phase: i as f32 * std::f32::consts::FRAC_PI_2,
                height: 0.6,
            },
        );
    }

    let marker = Arc::new(Mesh::new("marker").with_rendering_group(1));
    let material = Material::new("marker");
    renderer.style(&marker, &material, 0.3, Vec4::new(4.0, 3.2, 1.5, 1.0));
    spawn(
        scene,
        marker,
        material,
        Orbit {
            radius: 0.0,
            speed: 0.0,
            phase: 0.0,
            height: 0.0,
        },
    );
}

fn spawn(scene: &mut Scene, mesh: Arc<Mesh>, material: Material, orbit: Orbit) {
    let sub_mesh = SubMesh::new(Arc::clone(&mesh), Some(Arc::new(material)));
    scene
        .world
        .spawn((Transform::new(), orbit, Renderable::new(mesh).with_sub_mesh(sub_mesh)));
}

fn palette(t: f32) -> Vec3 {
    let tau = std::f32::consts::TAU;
    Vec3::new(
        0.5 + 0.5 * (tau * t).cos(),
        0.5 + 0.5 * (tau * (t + 0.33)).cos(),
        0.5 + 0.5 * (tau * (t + 0.67)).cos(),
    ) * 1.6
}

fn animate(scene: &mut Scene, time: f32) {
    for (_entity, (transform, orbit)) in scene.world.query_mut::<(&mut Transform, &Orbit)>() {
        let angle = orbit.phase + orbit.speed * time;
        transform.position = Vec3::new(
            orbit.radius * angle.cos(),
            orbit.height * (time + orbit.phase).sin(),
            orbit.radius * angle.sin(),
        );
        transform.rotation = Quat::from_rotation_y(angle);
    }
}

enum StrataApp {
    Pending {
        config: AppConfig,
    },
    Running {
        window: Arc<Window>,
        engine: WgpuEngine,
        scene: Scene,
        renderer: DiscRenderer,
        camera: CameraRef,
        bloom_enabled: bool,
        start_time: Instant,
    },
    Failed,
}

impl StrataApp {
    fn start(config: &AppConfig, event_loop: &ActiveEventLoop) -> Result<Self, Box<dyn std::error::Error>> {
        let window_attrs = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);
        let mut engine = WgpuEngine::new(Arc::clone(&window))?;

        let mut scene = Scene::new();
        scene.clear_color = Vec4::new(0.02, 0.02, 0.05, 1.0);
        let camera = scene.add_camera(Camera::new("main").at(0.0, 4.0, 8.0).looking_at(0.0, 0.0, 0.0));

        let mut renderer = DiscRenderer::new();
        populate(&mut scene, &mut renderer);

        scene
            .pipeline_manager
            .add_pipeline(bloom_pipeline(BLOOM, BloomConfig::new().threshold(0.8).weight(0.6)));
        scene.pipeline_manager.attach_cameras_to_render_pipeline(
            &mut engine,
            BLOOM,
            &[Rc::clone(&camera)],
            false,
        )?;

        Ok(StrataApp::Running {
            window,
            engine,
            scene,
            renderer,
            camera,
            bloom_enabled: true,
            start_time: Instant::now(),
        })
    }
}

fn render_frame(
    engine: &mut WgpuEngine,
    scene: &mut Scene,
    renderer: &mut DiscRenderer,
    time: f32,
) -> EngineResult<()> {
    use strata::Engine;

    animate(scene, time);
    engine.begin_frame()?;
    scene.pipeline_manager.update(engine);

    let aspect = engine.render_width() as f32 / engine.render_height().max(1) as f32;
    for camera in scene.cameras().to_vec() {
        let camera = camera.borrow();
        let frame = scene.begin_camera(engine, &camera);
        renderer.begin(&camera, aspect);
        scene.render_groups(renderer, None, &camera, &frame);
        renderer.flush(engine)?;
        scene.end_camera(engine, &camera, &frame);
    }

    engine.end_frame()
}

fn toggle_bloom(engine: &mut WgpuEngine, scene: &mut Scene, camera: &CameraRef, enabled: bool) {
    let cameras = [Rc::clone(camera)];
    let result = if enabled {
        scene
            .pipeline_manager
            .attach_cameras_to_render_pipeline(engine, BLOOM, &cameras, false)
    } else {
        scene
            .pipeline_manager
            .detach_cameras_from_render_pipeline(engine, BLOOM, &cameras)
    };
    match result {
        Ok(()) => log::info!("Bloom {}", if enabled { "on" } else { "off" }),
        Err(err) => log::error!("Failed to toggle bloom: {}", err),
    }
}

impl ApplicationHandler for StrataApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let StrataApp::Pending { config } = self {
            *self = match StrataApp::start(config, event_loop) {
                Ok(app) => app,
                Err(err) => {
                    log::error!("Failed to start: {}", err);
                    event_loop.exit();
                    StrataApp::Failed
                }
            };
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let StrataApp::Running {
            window,
            engine,
            scene,
            renderer,
            camera,
            bloom_enabled,
            start_time,
        } = self
        else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                scene.dispose(engine);
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                engine.resize(size.width, size.height);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match code {
                KeyCode::Escape => {
                    scene.dispose(engine);
                    event_loop.exit();
                }
                KeyCode::KeyB => {
                    *bloom_enabled = !*bloom_enabled;
                    toggle_bloom(engine, scene, camera, *bloom_enabled);
                }
                _ => {}
            },
            WindowEvent::RedrawRequested => {
                let time = start_time.elapsed().as_secs_f32();
                if let Err(err) = render_frame(engine, scene, renderer, time) {
                    log::warn!("Skipped frame: {}", err);
                }
                window.request_redraw();
            }
            _ => {}
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let event_loop = EventLoop::new().expect("failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = StrataApp::Pending {
        config: AppConfig::new().title("Strata: bloom over rendering groups").size(1280, 720),
    };
    event_loop.run_app(&mut app).expect("event loop terminated with an error");
}
