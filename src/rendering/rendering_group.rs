use std::sync::Arc;

use super::sort::SortPolicy;
use super::sub_mesh::{EdgesRenderer, Material, Mesh, MeshId, ParticleSystem, QueuedSubMesh, SpriteManager, SubMesh};
use crate::camera::Camera;

/// Stage a draw belongs to, in the order a group issues them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderStage {
    DepthOnly,
    Opaque,
    AlphaTest,
    Particles,
    BeforeTransparents,
    Transparent,
    Edges,
    Sprites,
}

/// Receives the draws a rendering group issues.
///
/// The group decides order; the renderer decides how a submesh, particle system,
/// sprite batch, or edge overlay turns into GPU work.
pub trait GroupRenderer {
    fn render_sub_mesh(&mut self, stage: RenderStage, sub_mesh: &QueuedSubMesh);

    fn render_particles(&mut self, _system: &dyn ParticleSystem) {}

    fn render_sprites(&mut self, _manager: &dyn SpriteManager) {}

    fn render_edges(&mut self, _edges: &dyn EdgesRenderer) {}

    /// Runs between the particle and transparent stages.
    fn before_transparents(&mut self, _group: u32) {}

    fn set_color_write(&mut self, _enabled: bool) {}

    fn clear_depth_stencil(&mut self, _group: u32) {}
}

/// Read-only view of a group's four queues, handed to custom render functions.
#[derive(Clone, Copy, Debug)]
pub struct RenderQueues<'a> {
    pub opaque: &'a [QueuedSubMesh],
    pub alpha_test: &'a [QueuedSubMesh],
    pub transparent: &'a [QueuedSubMesh],
    pub depth_only: &'a [QueuedSubMesh],
}

impl RenderQueues<'_> {
    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.alpha_test.is_empty() && self.transparent.is_empty() && self.depth_only.is_empty()
    }
}

/// Replaces the default stage sequence. The second argument runs the group's
/// before-transparents hook.
pub type CustomRenderFunction<'a> = dyn FnMut(RenderQueues<'_>, &mut dyn FnMut()) + 'a;

/// One render-order bucket of submeshes, sprites, and particle systems.
pub struct RenderingGroup {
    pub index: u32,
    opaque: Vec<QueuedSubMesh>,
    alpha_test: Vec<QueuedSubMesh>,
    transparent: Vec<QueuedSubMesh>,
    depth_only: Vec<QueuedSubMesh>,
    particle_systems: Vec<Arc<dyn ParticleSystem>>,
    sprite_managers: Vec<Arc<dyn SpriteManager>>,
    edges_renderers: Vec<Arc<dyn EdgesRenderer>>,
    opaque_sort: SortPolicy,
    alpha_test_sort: SortPolicy,
    transparent_sort: SortPolicy,
    disposed: bool,
}

impl RenderingGroup {
    /// Creates a group with the default policies: opaque and alpha-test queues
    /// keep dispatch order, transparent uses the default transparent compare.
    pub fn new(index: u32) -> Self {
        Self::with_policies(
            index,
            SortPolicy::NoSort,
            SortPolicy::NoSort,
            SortPolicy::default_transparent(),
        )
    }

    pub fn with_policies(index: u32, opaque: SortPolicy, alpha_test: SortPolicy, transparent: SortPolicy) -> Self {
        Self {
            index,
            opaque: Vec::new(),
            alpha_test: Vec::new(),
            transparent: Vec::new(),
            depth_only: Vec::new(),
            particle_systems: Vec::new(),
            sprite_managers: Vec::new(),
            edges_renderers: Vec::new(),
            opaque_sort: opaque,
            alpha_test_sort: alpha_test,
            transparent_sort: transparent,
            disposed: false,
        }
    }

    pub fn set_opaque_sort(&mut self, policy: SortPolicy) {
        self.opaque_sort = policy;
    }

    pub fn set_alpha_test_sort(&mut self, policy: SortPolicy) {
        self.alpha_test_sort = policy;
    }

    pub fn set_transparent_sort(&mut self, policy: SortPolicy) {
        self.transparent_sort = policy;
    }

    /// Clears every queue and side list. Runs once per frame before dispatching.
    pub fn prepare(&mut self) {
        self.opaque.clear();
        self.alpha_test.clear();
        self.transparent.clear();
        self.depth_only.clear();
        self.particle_systems.clear();
        self.sprite_managers.clear();
        self.edges_renderers.clear();
    }

    /// Releases every queued reference, including edge renderers.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.prepare();
        self.edges_renderers.shrink_to_fit();
        self.disposed = true;
        log::debug!("Rendering group {} disposed", self.index);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Dispatches a submesh using its bounding center as the world position.
    pub fn dispatch(&mut self, sub_mesh: &Arc<SubMesh>, mesh: Option<&Arc<Mesh>>, material: Option<&Arc<Material>>) {
        self.dispatch_at(sub_mesh, sub_mesh.bounding_center, mesh, material);
    }

    /// Classifies a submesh into exactly one queue.
    ///
    /// `mesh` and `material` default to the submesh's own. Submeshes without a
    /// material are skipped.
    pub fn dispatch_at(
        &mut self,
        sub_mesh: &Arc<SubMesh>,
        world_center: glam::Vec3,
        mesh: Option<&Arc<Mesh>>,
        material: Option<&Arc<Material>>,
    ) {
        let mesh = mesh.unwrap_or(&sub_mesh.mesh);
        let Some(material) = material.or(sub_mesh.material.as_ref()) else {
            return;
        };

        let mut queued = QueuedSubMesh::new(Arc::clone(sub_mesh), world_center);
        queued.alpha_index = mesh.alpha_index;
        queued.rendering_group_id = mesh.rendering_group_id;

        if material.needs_alpha_blending() && !material.force_depth_write {
            self.transparent.push(queued);
        } else if material.alpha_test {
            self.alpha_test.push(queued);
        } else if material.depth_pre_pass_only {
            self.depth_only.push(queued);
        } else {
            self.opaque.push(queued);
        }

        if let Some(edges) = mesh.edges_renderer.as_ref().filter(|e| e.is_enabled()) {
            if !self.edges_renderers.iter().any(|e| Arc::ptr_eq(e, edges)) {
                self.edges_renderers.push(Arc::clone(edges));
            }
        }
    }

    pub fn dispatch_sprites(&mut self, manager: Arc<dyn SpriteManager>) {
        self.sprite_managers.push(manager);
    }

    pub fn dispatch_particles(&mut self, system: Arc<dyn ParticleSystem>) {
        self.particle_systems.push(system);
    }

    pub fn queues(&self) -> RenderQueues<'_> {
        RenderQueues {
            opaque: &self.opaque,
            alpha_test: &self.alpha_test,
            transparent: &self.transparent,
            depth_only: &self.depth_only,
        }
    }

    pub fn edges_renderer_count(&self) -> usize {
        self.edges_renderers.len()
    }

    pub fn has_content(&self, render_sprites: bool, render_particles: bool) -> bool {
        !self.queues().is_empty()
            || (render_sprites && !self.sprite_managers.is_empty())
            || (render_particles && !self.particle_systems.is_empty())
    }

    /// Sorts and issues this group's draws for `camera`.
    ///
    /// Stage order: depth-only (color writes off), opaque, alpha-test,
    /// particles, before-transparents hook, transparent, edges, sprites.
    /// A custom render function replaces all of it and receives the unsorted queues.
    pub fn render(
        &mut self,
        renderer: &mut dyn GroupRenderer,
        custom_render_function: Option<&mut CustomRenderFunction<'_>>,
        render_sprites: bool,
        render_particles: bool,
        active_meshes: &[MeshId],
        camera: &Camera,
    ) {
        if let Some(custom) = custom_render_function {
            if self.has_content(render_sprites, render_particles) {
                let index = self.index;
                custom(self.queues(), &mut || renderer.before_transparents(index));
            }
            return;
        }

        for queue in [&mut self.opaque, &mut self.alpha_test, &mut self.transparent, &mut self.depth_only] {
            for entry in queue.iter_mut() {
                entry.update_distance(camera.position);
            }
        }

        if !self.depth_only.is_empty() {
            self.alpha_test_sort.sort(&mut self.depth_only);
            renderer.set_color_write(false);
            for entry in &self.depth_only {
                renderer.render_sub_mesh(RenderStage::DepthOnly, entry);
            }
            renderer.set_color_write(true);
        }

        self.opaque_sort.sort(&mut self.opaque);
        for entry in &self.opaque {
            renderer.render_sub_mesh(RenderStage::Opaque, entry);
        }

        self.alpha_test_sort.sort(&mut self.alpha_test);
        for entry in &self.alpha_test {
            renderer.render_sub_mesh(RenderStage::AlphaTest, entry);
        }

        if render_particles {
            self.render_particles(renderer, active_meshes, camera);
        }

        renderer.before_transparents(self.index);

        self.transparent_sort.sort(&mut self.transparent);
        for entry in &self.transparent {
            renderer.render_sub_mesh(RenderStage::Transparent, entry);
        }

        for edges in &self.edges_renderers {
            renderer.render_edges(edges.as_ref());
        }

        if render_sprites {
            for manager in &self.sprite_managers {
                if manager.layer_mask() & camera.layer_mask != 0 {
                    renderer.render_sprites(manager.as_ref());
                }
            }
        }
    }

    fn render_particles(&self, renderer: &mut dyn GroupRenderer, active_meshes: &[MeshId], camera: &Camera) {
        for system in &self.particle_systems {
            if !system.is_started() || system.layer_mask() & camera.layer_mask == 0 {
                continue;
            }
            if system.emitter().is_some_and(|emitter| !active_meshes.contains(&emitter)) {
                continue;
            }
            renderer.render_particles(system.as_ref());
        }
    }
}

impl std::fmt::Debug for RenderingGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderingGroup")
            .field("index", &self.index)
            .field("opaque", &self.opaque.len())
            .field("alpha_test", &self.alpha_test.len())
            .field("transparent", &self.transparent.len())
            .field("depth_only", &self.depth_only.len())
            .field("particle_systems", &self.particle_systems.len())
            .field("sprite_managers", &self.sprite_managers.len())
            .finish()
    }
}
