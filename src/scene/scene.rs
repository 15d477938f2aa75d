use std::rc::Rc;
use std::sync::Arc;

use glam::{Mat4, Vec4};

use super::components::{Renderable, Transform, Visibility};
use crate::camera::{Camera, CameraId, CameraRef};
use crate::engine::{Engine, FrameTarget};
use crate::observable::Observable;
use crate::postprocess::PostProcessManager;
use crate::postprocess::render_pipeline::PostProcessRenderPipelineManager;
use crate::rendering::{CustomRenderFunction, GroupRenderer, MeshId, ParticleSystem, RenderingManager, SpriteManager};

/// What [`Scene::begin_camera`] set up for one camera.
#[derive(Clone, Debug, Default)]
pub struct CameraFrame {
    /// Meshes dispatched for this camera.
    pub active_meshes: Vec<MeshId>,
    /// The scene renders into the first pass of the camera's chain.
    pub post_processed: bool,
}

/// Entity store plus the per-frame rendering drivers.
///
/// [`render`](Self::render) runs one frame for every camera: pipelines are
/// revalidated once, then each camera gets its groups reset and refilled from
/// the world, its post-process chain prepared, its groups rendered, and the
/// chain finalized into the camera's target.
///
/// Renderers that need the engine while drawing can drive the three phases
/// themselves: [`begin_camera`](Self::begin_camera),
/// [`render_groups`](Self::render_groups), [`end_camera`](Self::end_camera).
pub struct Scene {
    pub world: hecs::World,
    pub rendering_manager: RenderingManager,
    pub post_process_manager: PostProcessManager,
    pub pipeline_manager: PostProcessRenderPipelineManager,
    cameras: Vec<CameraRef>,
    sprite_managers: Vec<Arc<dyn SpriteManager>>,
    particle_systems: Vec<Arc<dyn ParticleSystem>>,
    pub clear_color: Vec4,
    pub render_particles: bool,
    pub render_sprites: bool,
    pub on_before_camera_render: Observable<CameraId>,
    pub on_after_camera_render: Observable<CameraId>,
    disposed: bool,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            world: hecs::World::new(),
            rendering_manager: RenderingManager::new(),
            post_process_manager: PostProcessManager::new(),
            pipeline_manager: PostProcessRenderPipelineManager::new(),
            cameras: Vec::new(),
            sprite_managers: Vec::new(),
            particle_systems: Vec::new(),
            clear_color: Vec4::new(0.2, 0.2, 0.3, 1.0),
            render_particles: true,
            render_sprites: true,
            on_before_camera_render: Observable::new(),
            on_after_camera_render: Observable::new(),
            disposed: false,
        }
    }

    /// Adds a camera and returns its shared handle. Cameras render in insertion order.
    pub fn add_camera(&mut self, camera: Camera) -> CameraRef {
        let camera = camera.into_ref();
        self.cameras.push(Rc::clone(&camera));
        camera
    }

    pub fn remove_camera(&mut self, camera: CameraId) -> Option<CameraRef> {
        let index = self.cameras.iter().position(|c| c.borrow().id() == camera)?;
        Some(self.cameras.remove(index))
    }

    pub fn cameras(&self) -> &[CameraRef] {
        &self.cameras
    }

    pub fn add_sprite_manager(&mut self, manager: Arc<dyn SpriteManager>) {
        self.sprite_managers.push(manager);
    }

    pub fn add_particle_system(&mut self, system: Arc<dyn ParticleSystem>) {
        self.particle_systems.push(system);
    }

    /// Renders one frame for every camera.
    pub fn render(&mut self, engine: &mut dyn Engine, renderer: &mut dyn GroupRenderer) {
        self.render_with(engine, renderer, None);
    }

    /// Like [`render`](Self::render), with a function replacing the default draws of every group.
    pub fn render_with(
        &mut self,
        engine: &mut dyn Engine,
        renderer: &mut dyn GroupRenderer,
        mut custom_render_function: Option<&mut CustomRenderFunction<'_>>,
    ) {
        if self.disposed {
            return;
        }
        self.pipeline_manager.update(engine);

        for camera in self.cameras.clone() {
            let camera = camera.borrow();
            let frame = self.begin_camera(engine, &camera);
            self.render_groups(renderer, custom_render_function.as_deref_mut(), &camera, &frame);
            self.end_camera(engine, &camera, &frame);
        }
    }

    /// Fills the rendering groups for `camera` and binds the framebuffer the
    /// scene draws into.
    pub fn begin_camera(&mut self, engine: &mut dyn Engine, camera: &Camera) -> CameraFrame {
        self.on_before_camera_render.notify(&camera.id());
        self.rendering_manager.reset();

        let mut active_meshes = Vec::new();
        let mut query = self
            .world
            .query::<(&Renderable, Option<&Transform>, Option<&Visibility>)>();
        for (_entity, (renderable, transform, visibility)) in query.iter() {
            if visibility.is_some_and(|v| !v.visible) {
                continue;
            }
            if renderable.mesh.layer_mask & camera.layer_mask == 0 {
                continue;
            }
            let world = transform.map_or(Mat4::IDENTITY, Transform::matrix);
            active_meshes.push(renderable.mesh.id());
            for sub_mesh in &renderable.sub_meshes {
                let center = sub_mesh.world_center(&world);
                self.rendering_manager
                    .dispatch(sub_mesh, center, Some(&renderable.mesh), None);
            }
        }
        drop(query);

        for manager in &self.sprite_managers {
            self.rendering_manager.dispatch_sprites(Arc::clone(manager));
        }
        for system in &self.particle_systems {
            self.rendering_manager.dispatch_particles(Arc::clone(system));
        }

        let target = camera.output_render_target;
        let post_processed = self.post_process_manager.prepare_frame(engine, camera, target);
        if !post_processed {
            let frame_target = target.map_or(FrameTarget::Screen, FrameTarget::Texture);
            engine.bind_framebuffer(frame_target, Some(self.clear_color));
        }

        CameraFrame {
            active_meshes,
            post_processed,
        }
    }

    /// Renders every rendering group for `camera`.
    pub fn render_groups(
        &mut self,
        renderer: &mut dyn GroupRenderer,
        custom_render_function: Option<&mut CustomRenderFunction<'_>>,
        camera: &Camera,
        frame: &CameraFrame,
    ) {
        self.rendering_manager.render(
            renderer,
            custom_render_function,
            &frame.active_meshes,
            self.render_particles,
            self.render_sprites,
            camera,
        );
    }

    /// Runs the camera's post-process chain into its final target.
    pub fn end_camera(&mut self, engine: &mut dyn Engine, camera: &Camera, frame: &CameraFrame) {
        if frame.post_processed {
            self.post_process_manager
                .finalize_frame(engine, camera, camera.output_render_target, false);
        }
        self.on_after_camera_render.notify(&camera.id());
    }

    /// Recreates post-process GPU state after a device loss.
    ///
    /// Pipelines rebuild their own passes in dependency order. Passes attached to
    /// a camera directly are rebuilt afterwards, each once.
    pub fn rebuild(&mut self, engine: &mut dyn Engine) {
        self.pipeline_manager.rebuild(engine);

        for camera in &self.cameras {
            for post_process in camera.borrow().active_post_processes() {
                if post_process.borrow().needs_rebuild(engine) {
                    post_process.borrow_mut().rebuild(engine);
                }
            }
        }
    }

    /// Disposes pipelines and rendering groups. Repeated calls are no-ops.
    pub fn dispose(&mut self, engine: &mut dyn Engine) {
        if self.disposed {
            return;
        }
        self.pipeline_manager.dispose(engine);
        self.post_process_manager.dispose();
        self.rendering_manager.dispose();
        self.sprite_managers.clear();
        self.particle_systems.clear();
        self.world.clear();
        self.on_before_camera_render.clear();
        self.on_after_camera_render.clear();
        self.disposed = true;
        log::debug!("Scene disposed");
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::engine::HeadlessEngine;
    use crate::postprocess::{CompileState, PostProcessOptions, builtin};
    use crate::rendering::{Material, Mesh, QueuedSubMesh, RenderStage, SubMesh};

    #[derive(Default)]
    struct Recorder {
        drawn: Vec<String>,
    }

    impl GroupRenderer for Recorder {
        fn render_sub_mesh(&mut self, _stage: RenderStage, sub_mesh: &QueuedSubMesh) {
            self.drawn.push(sub_mesh.mesh().name.clone());
        }
    }

    fn spawn(scene: &mut Scene, name: &str, layer_mask: u32, z: f32) -> hecs::Entity {
        let mesh = Arc::new(Mesh::new(name).with_layer_mask(layer_mask));
        let sub_mesh = SubMesh::new(Arc::clone(&mesh), Some(Arc::new(Material::new("m"))));
        scene.world.spawn((
            Transform::from_position(Vec3::new(0.0, 0.0, z)),
            Renderable::new(mesh).with_sub_mesh(sub_mesh),
        ))
    }

    #[test]
    fn hidden_and_masked_entities_are_not_drawn() {
        let mut engine = HeadlessEngine::new(64, 64);
        let mut scene = Scene::new();
        scene.add_camera(Camera::new("main").with_layer_mask(0x1));
        spawn(&mut scene, "visible", 0x1, -1.0);
        spawn(&mut scene, "other layer", 0x2, -1.0);
        let hidden = spawn(&mut scene, "hidden", 0x1, -1.0);
        scene.world.insert_one(hidden, Visibility::hidden()).unwrap();

        let mut recorder = Recorder::default();
        scene.render(&mut engine, &mut recorder);
        assert_eq!(recorder.drawn, vec!["visible"]);
        assert_eq!(engine.bound_framebuffer(), Some(FrameTarget::Screen));
    }

    #[test]
    fn every_camera_renders_the_world() {
        let mut engine = HeadlessEngine::new(64, 64);
        let mut scene = Scene::new();
        scene.add_camera(Camera::new("left"));
        scene.add_camera(Camera::new("right"));
        spawn(&mut scene, "cube", 0x0FFF_FFFF, -3.0);

        let mut recorder = Recorder::default();
        scene.render(&mut engine, &mut recorder);
        assert_eq!(recorder.drawn, vec!["cube", "cube"]);
    }

    #[test]
    fn rebuild_revives_passes_attached_without_a_pipeline() {
        let mut engine = HeadlessEngine::new(64, 64);
        let mut scene = Scene::new();
        let camera = scene.add_camera(Camera::new("main"));
        let copy = builtin::pass(&mut engine, "copy", PostProcessOptions::new()).into_ref();
        camera.borrow_mut().attach_post_process(Rc::clone(&copy), None);
        spawn(&mut scene, "cube", 0x0FFF_FFFF, -3.0);

        let mut recorder = Recorder::default();
        scene.render(&mut engine, &mut recorder);
        assert_eq!(engine.draws().len(), 1);

        engine.lose_device();
        scene.render(&mut engine, &mut recorder);
        assert!(copy.borrow().needs_rebuild(&engine));

        scene.rebuild(&mut engine);
        assert!(!copy.borrow().needs_rebuild(&engine));
        engine.clear_calls();
        for _ in 0..3 {
            scene.render(&mut engine, &mut recorder);
        }
        assert_eq!(engine.draws().len(), 3);
        assert_eq!(copy.borrow().compile_state(), &CompileState::Ready);
        assert!(engine.draws().iter().all(|(_, target)| *target == FrameTarget::Screen));
    }

    #[test]
    fn dispose_twice_is_harmless() {
        let mut engine = HeadlessEngine::new(64, 64);
        let mut scene = Scene::new();
        scene.add_camera(Camera::new("main"));
        spawn(&mut scene, "cube", 0x0FFF_FFFF, -3.0);
        scene.dispose(&mut engine);
        scene.dispose(&mut engine);

        let mut recorder = Recorder::default();
        scene.render(&mut engine, &mut recorder);
        assert!(recorder.drawn.is_empty());
    }
}
