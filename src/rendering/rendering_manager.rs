use std::sync::Arc;

use glam::Vec3;

use super::rendering_group::{CustomRenderFunction, GroupRenderer, RenderingGroup};
use super::sort::SortPolicy;
use super::sub_mesh::{Material, Mesh, MeshId, ParticleSystem, SpriteManager, SubMesh};
use crate::camera::Camera;
use crate::observable::Observable;

/// Number of rendering groups a scene can use. Group ids are `0..MAX_RENDERING_GROUPS`.
pub const MAX_RENDERING_GROUPS: u32 = 4;

#[derive(Clone, Debug)]
struct RenderingOrder {
    opaque: SortPolicy,
    alpha_test: SortPolicy,
    transparent: SortPolicy,
}

/// Owns the rendering groups of a scene and renders them in ascending index.
///
/// Groups are created on the first dispatch that targets them.
pub struct RenderingManager {
    groups: Vec<Option<RenderingGroup>>,
    orders: Vec<Option<RenderingOrder>>,
    auto_clear_depth_stencil: Vec<bool>,
    /// Notified with the group index before a group renders.
    pub on_before_rendering_group: Observable<u32>,
    /// Notified with the group index after a group rendered.
    pub on_after_rendering_group: Observable<u32>,
}

impl Default for RenderingManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderingManager {
    pub fn new() -> Self {
        let count = MAX_RENDERING_GROUPS as usize;
        Self {
            groups: (0..count).map(|_| None).collect(),
            orders: vec![None; count],
            auto_clear_depth_stencil: vec![true; count],
            on_before_rendering_group: Observable::new(),
            on_after_rendering_group: Observable::new(),
        }
    }

    fn check_group_id(group: u32) -> Option<usize> {
        if group < MAX_RENDERING_GROUPS {
            Some(group as usize)
        } else {
            log::error!(
                "Rendering group id {} is out of range (0..{}), ignoring",
                group,
                MAX_RENDERING_GROUPS
            );
            None
        }
    }

    fn group_mut(&mut self, group: u32) -> Option<&mut RenderingGroup> {
        let index = Self::check_group_id(group)?;
        let order = self.orders[index].clone();
        Some(self.groups[index].get_or_insert_with(|| match order {
            Some(o) => RenderingGroup::with_policies(group, o.opaque, o.alpha_test, o.transparent),
            None => RenderingGroup::new(group),
        }))
    }

    pub fn rendering_group(&self, group: u32) -> Option<&RenderingGroup> {
        self.groups.get(group as usize)?.as_ref()
    }

    /// Sets the queue policies of one group, now and for the group created later.
    pub fn set_rendering_order(
        &mut self,
        group: u32,
        opaque: SortPolicy,
        alpha_test: SortPolicy,
        transparent: SortPolicy,
    ) {
        let Some(index) = Self::check_group_id(group) else {
            return;
        };
        if let Some(existing) = self.groups[index].as_mut() {
            existing.set_opaque_sort(opaque.clone());
            existing.set_alpha_test_sort(alpha_test.clone());
            existing.set_transparent_sort(transparent.clone());
        }
        self.orders[index] = Some(RenderingOrder {
            opaque,
            alpha_test,
            transparent,
        });
    }

    /// Whether depth and stencil are cleared before `group` renders. On by default.
    pub fn set_auto_clear_depth_stencil(&mut self, group: u32, enabled: bool) {
        if let Some(index) = Self::check_group_id(group) {
            self.auto_clear_depth_stencil[index] = enabled;
        }
    }

    pub fn auto_clear_depth_stencil(&self, group: u32) -> bool {
        self.auto_clear_depth_stencil
            .get(group as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Prepares every group for a new frame.
    pub fn reset(&mut self) {
        for group in self.groups.iter_mut().flatten() {
            group.prepare();
        }
    }

    /// Routes a submesh to the group named by its mesh.
    pub fn dispatch(
        &mut self,
        sub_mesh: &Arc<SubMesh>,
        world_center: Vec3,
        mesh: Option<&Arc<Mesh>>,
        material: Option<&Arc<Material>>,
    ) {
        let group = mesh.unwrap_or(&sub_mesh.mesh).rendering_group_id;
        if let Some(target) = self.group_mut(group) {
            target.dispatch_at(sub_mesh, world_center, mesh, material);
        }
    }

    pub fn dispatch_sprites(&mut self, manager: Arc<dyn SpriteManager>) {
        if let Some(target) = self.group_mut(manager.rendering_group_id()) {
            target.dispatch_sprites(manager);
        }
    }

    pub fn dispatch_particles(&mut self, system: Arc<dyn ParticleSystem>) {
        if let Some(target) = self.group_mut(system.rendering_group_id()) {
            target.dispatch_particles(system);
        }
    }

    /// Renders every group in ascending index.
    pub fn render(
        &mut self,
        renderer: &mut dyn GroupRenderer,
        mut custom_render_function: Option<&mut CustomRenderFunction<'_>>,
        active_meshes: &[MeshId],
        render_particles: bool,
        render_sprites: bool,
        camera: &Camera,
    ) {
        for index in 0..self.groups.len() {
            let Some(group) = self.groups[index].as_mut() else {
                continue;
            };
            let id = group.index;

            if self.auto_clear_depth_stencil[index] {
                renderer.clear_depth_stencil(id);
            }

            self.on_before_rendering_group.notify(&id);
            group.render(
                renderer,
                custom_render_function.as_deref_mut(),
                render_sprites,
                render_particles,
                active_meshes,
                camera,
            );
            self.on_after_rendering_group.notify(&id);
        }
    }

    pub fn dispose(&mut self) {
        for group in self.groups.iter_mut().flatten() {
            group.dispose();
        }
        for group in &mut self.groups {
            *group = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::rendering::{QueuedSubMesh, RenderStage};

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl GroupRenderer for Recorder {
        fn render_sub_mesh(&mut self, _stage: RenderStage, sub_mesh: &QueuedSubMesh) {
            self.events.push(sub_mesh.mesh().name.clone());
        }

        fn clear_depth_stencil(&mut self, group: u32) {
            self.events.push(format!("clear {group}"));
        }
    }

    fn sub_mesh_in(name: &str, group: u32) -> Arc<SubMesh> {
        let mesh = Arc::new(Mesh::new(name).with_rendering_group(group));
        Arc::new(SubMesh::new(mesh, Some(Arc::new(Material::new("m")))))
    }

    #[test]
    fn groups_render_in_ascending_order() {
        let mut manager = RenderingManager::new();
        manager.set_auto_clear_depth_stencil(0, false);
        for (name, group) in [("overlay", 2), ("world", 0), ("ui", 3)] {
            manager.dispatch(&sub_mesh_in(name, group), Vec3::ZERO, None, None);
        }

        let mut recorder = Recorder::default();
        manager.render(&mut recorder, None, &[], false, false, &Camera::default());
        assert_eq!(
            recorder.events,
            vec!["world", "clear 2", "overlay", "clear 3", "ui"]
        );
        assert!(manager.rendering_group(1).is_none());
    }

    #[test]
    fn out_of_range_group_is_ignored() {
        let mut manager = RenderingManager::new();
        manager.dispatch(&sub_mesh_in("lost", 7), Vec3::ZERO, None, None);

        let mut recorder = Recorder::default();
        manager.render(&mut recorder, None, &[], false, false, &Camera::default());
        assert!(recorder.events.is_empty());
    }

    #[test]
    fn rendering_order_applies_to_later_groups() {
        let mut manager = RenderingManager::new();
        manager.set_rendering_order(
            1,
            SortPolicy::front_to_back(),
            SortPolicy::NoSort,
            SortPolicy::back_to_front(),
        );
        manager.set_auto_clear_depth_stencil(1, false);

        let far = {
            let mesh = Arc::new(Mesh::new("far").with_rendering_group(1));
            Arc::new(SubMesh::new(mesh, Some(Arc::new(Material::new("m")))))
        };
        let near = {
            let mesh = Arc::new(Mesh::new("near").with_rendering_group(1));
            Arc::new(SubMesh::new(mesh, Some(Arc::new(Material::new("m")))))
        };
        manager.dispatch(&far, Vec3::new(0.0, 0.0, -20.0), None, None);
        manager.dispatch(&near, Vec3::new(0.0, 0.0, -2.0), None, None);

        let mut recorder = Recorder::default();
        let camera = Camera::default().at(0.0, 0.0, 0.0);
        manager.render(&mut recorder, None, &[], false, false, &camera);
        assert_eq!(recorder.events, vec!["near", "far"]);
    }

    #[test]
    fn group_observers_bracket_each_group() {
        let mut manager = RenderingManager::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let before = Rc::clone(&log);
        manager
            .on_before_rendering_group
            .add(move |id| before.borrow_mut().push(format!("before {id}")));
        let after = Rc::clone(&log);
        manager
            .on_after_rendering_group
            .add(move |id| after.borrow_mut().push(format!("after {id}")));

        manager.dispatch(&sub_mesh_in("a", 1), Vec3::ZERO, None, None);
        manager.render(&mut Recorder::default(), None, &[], false, false, &Camera::default());
        assert_eq!(*log.borrow(), vec!["before 1", "after 1"]);
    }

    #[test]
    fn reset_clears_queues_and_dispose_is_idempotent() {
        let mut manager = RenderingManager::new();
        manager.dispatch(&sub_mesh_in("a", 0), Vec3::ZERO, None, None);
        manager.reset();
        assert!(manager.rendering_group(0).is_some_and(|g| g.queues().is_empty()));

        manager.dispose();
        manager.dispose();
        assert!(manager.rendering_group(0).is_none());
    }
}
