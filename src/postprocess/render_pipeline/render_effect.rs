use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::camera::{CameraId, CameraRef};
use crate::engine::Engine;
use crate::error::RenderResult;
use crate::postprocess::PostProcessRef;

/// Builds the passes of one effect instance. Called once per attached camera,
/// or once in total for single-instance effects.
pub type PostProcessFactory = Box<dyn FnMut(&mut dyn Engine) -> RenderResult<Vec<PostProcessRef>>>;

/// Key of an instance list: one shared list, or one list per camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CameraKey {
    Shared,
    Camera(CameraId),
}

/// A named group of passes forming one visual effect.
///
/// Attaching a camera instantiates the passes (or reuses the shared instance)
/// and appends them to the camera's chain, remembering the slots they took.
/// Disabling empties those slots without freeing anything; enabling puts the
/// passes back into the same slots.
pub struct PostProcessRenderEffect {
    pub name: String,
    factory: PostProcessFactory,
    single_instance: bool,
    post_processes: IndexMap<CameraKey, Vec<PostProcessRef>>,
    indices_for_camera: HashMap<CameraId, Vec<usize>>,
    disposed: bool,
}

impl PostProcessRenderEffect {
    pub fn new(
        name: impl Into<String>,
        single_instance: bool,
        factory: impl FnMut(&mut dyn Engine) -> RenderResult<Vec<PostProcessRef>> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            factory: Box::new(factory),
            single_instance,
            post_processes: IndexMap::new(),
            indices_for_camera: HashMap::new(),
            disposed: false,
        }
    }

    pub fn is_single_instance(&self) -> bool {
        self.single_instance
    }

    fn key_for(&self, camera: CameraId) -> CameraKey {
        if self.single_instance {
            CameraKey::Shared
        } else {
            CameraKey::Camera(camera)
        }
    }

    /// True only if every instantiated pass compiled (or is still compiling).
    pub fn is_supported(&self) -> bool {
        self.post_processes
            .values()
            .flatten()
            .all(|pp| pp.borrow().is_supported())
    }

    pub fn is_attached_to(&self, camera: CameraId) -> bool {
        self.indices_for_camera.contains_key(&camera)
    }

    pub fn attached_cameras(&self) -> impl Iterator<Item = CameraId> + '_ {
        self.indices_for_camera.keys().copied()
    }

    /// Passes used by `camera`, or the shared list. Empty if never attached.
    pub fn post_processes(&self, camera: Option<CameraId>) -> Vec<PostProcessRef> {
        let key = match (self.single_instance, camera) {
            (true, _) => CameraKey::Shared,
            (false, Some(camera)) => CameraKey::Camera(camera),
            (false, None) => return Vec::new(),
        };
        self.post_processes.get(&key).cloned().unwrap_or_default()
    }

    /// Every instantiated pass, instance lists in attach order.
    pub fn all_post_processes(&self) -> impl Iterator<Item = &PostProcessRef> {
        self.post_processes.values().flatten()
    }

    /// Instantiates the passes for each camera not yet attached and appends them
    /// to its chain. Already attached cameras are skipped.
    pub fn attach_cameras(&mut self, engine: &mut dyn Engine, cameras: &[CameraRef]) -> RenderResult<()> {
        for camera in cameras {
            let mut camera = camera.borrow_mut();
            let id = camera.id();
            if self.indices_for_camera.contains_key(&id) {
                continue;
            }

            let key = self.key_for(id);
            if !self.post_processes.contains_key(&key) {
                let created = (self.factory)(engine)?;
                log::debug!(
                    "Render effect '{}' created {} pass(es) for {:?}",
                    self.name,
                    created.len(),
                    key
                );
                self.post_processes.insert(key, created);
            }

            let indices = self
                .post_processes
                .get(&key)
                .map(|passes| {
                    passes
                        .iter()
                        .map(|pp| {
                            pp.borrow_mut().add_camera(id);
                            camera.attach_post_process(Rc::clone(pp), None)
                        })
                        .collect()
                })
                .unwrap_or_default();
            self.indices_for_camera.insert(id, indices);
        }
        self.disposed = false;
        Ok(())
    }

    /// Removes the passes from each camera's chain and releases that camera's use
    /// of them. Per-camera instances are disposed; the shared instance goes away
    /// with its last camera.
    pub fn detach_cameras(&mut self, engine: &mut dyn Engine, cameras: &[CameraRef]) {
        for camera in cameras {
            let mut camera = camera.borrow_mut();
            let id = camera.id();
            if self.indices_for_camera.remove(&id).is_none() {
                continue;
            }

            let key = self.key_for(id);
            let passes = self.post_processes.get(&key).cloned().unwrap_or_default();
            for pp in &passes {
                camera.detach_post_process(pp);
                pp.borrow_mut().dispose(engine, Some(id));
            }

            let drop_list = match key {
                CameraKey::Camera(_) => true,
                CameraKey::Shared => self.indices_for_camera.is_empty(),
            };
            if drop_list {
                self.post_processes.shift_remove(&key);
            }
        }
    }

    /// Puts the passes back into the slots they held, where those slots are empty.
    pub fn enable(&mut self, cameras: &[CameraRef]) {
        for camera in cameras {
            let mut camera = camera.borrow_mut();
            let id = camera.id();
            let Some(indices) = self.indices_for_camera.get(&id) else {
                continue;
            };
            let Some(passes) = self.post_processes.get(&self.key_for(id)) else {
                continue;
            };
            for (pp, &index) in passes.iter().zip(indices) {
                if camera.slot_of(pp).is_none() && !camera.is_slot_occupied(index) {
                    camera.attach_post_process(Rc::clone(pp), Some(index));
                }
            }
        }
    }

    /// Takes the passes out of the cameras' chains without freeing them.
    pub fn disable(&mut self, cameras: &[CameraRef]) {
        for camera in cameras {
            let mut camera = camera.borrow_mut();
            let id = camera.id();
            if let Some(passes) = self.post_processes.get(&self.key_for(id)) {
                for pp in passes {
                    camera.detach_post_process(pp);
                }
            }
        }
    }

    /// Polls compilation and flags passes whose textures went stale.
    pub fn update(&mut self, engine: &mut dyn Engine) {
        for pp in self.post_processes.values().flatten() {
            let mut pp = pp.borrow_mut();
            if pp.is_disposed() {
                continue;
            }
            pp.is_ready(&*engine);
            if pp.textures().iter().any(|t| engine.texture_size(*t).is_none()) {
                pp.mark_texture_dirty();
            }
        }
    }

    /// Disposes every instance regardless of camera usage.
    pub fn dispose(&mut self, engine: &mut dyn Engine) {
        if self.disposed {
            return;
        }
        for pp in self.post_processes.values().flatten() {
            pp.borrow_mut().dispose(engine, None);
        }
        self.post_processes.clear();
        self.indices_for_camera.clear();
        self.disposed = true;
    }
}

impl std::fmt::Debug for PostProcessRenderEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessRenderEffect")
            .field("name", &self.name)
            .field("single_instance", &self.single_instance)
            .field("cameras", &self.indices_for_camera.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::camera::Camera;
    use crate::engine::HeadlessEngine;
    use crate::postprocess::{PostProcess, PostProcessOptions};

    fn effect(name: &'static str, single_instance: bool, calls: Rc<Cell<u32>>) -> PostProcessRenderEffect {
        PostProcessRenderEffect::new(name, single_instance, move |engine| {
            calls.set(calls.get() + 1);
            Ok(vec![
                PostProcess::new(engine, name, "", PostProcessOptions::new()).into_ref(),
            ])
        })
    }

    #[test]
    fn attach_is_idempotent_per_camera() {
        let mut engine = HeadlessEngine::default();
        let calls = Rc::new(Cell::new(0));
        let mut fx = effect("copy", false, Rc::clone(&calls));
        let camera = Camera::new("main").into_ref();

        fx.attach_cameras(&mut engine, &[Rc::clone(&camera)]).unwrap();
        fx.attach_cameras(&mut engine, &[Rc::clone(&camera)]).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(camera.borrow().active_post_processes().len(), 1);
        assert_eq!(fx.post_processes(Some(camera.borrow().id())).len(), 1);
        assert!(fx.post_processes(None).is_empty());
    }

    #[test]
    fn per_camera_instances_are_independent() {
        let mut engine = HeadlessEngine::default();
        let calls = Rc::new(Cell::new(0));
        let mut fx = effect("copy", false, Rc::clone(&calls));
        let a = Camera::new("a").into_ref();
        let b = Camera::new("b").into_ref();

        fx.attach_cameras(&mut engine, &[Rc::clone(&a), Rc::clone(&b)]).unwrap();
        assert_eq!(calls.get(), 2);
        let pa = fx.post_processes(Some(a.borrow().id()));
        let pb = fx.post_processes(Some(b.borrow().id()));
        assert!(!Rc::ptr_eq(&pa[0], &pb[0]));

        fx.detach_cameras(&mut engine, &[Rc::clone(&a)]);
        assert!(pa[0].borrow().is_disposed());
        assert!(!pb[0].borrow().is_disposed());
        assert!(fx.post_processes(Some(a.borrow().id())).is_empty());
        assert!(a.borrow().active_post_processes().is_empty());
    }

    #[test]
    fn single_instance_is_shared_and_usage_counted() {
        let mut engine = HeadlessEngine::default();
        let calls = Rc::new(Cell::new(0));
        let mut fx = effect("shared", true, Rc::clone(&calls));
        let a = Camera::new("a").into_ref();
        let b = Camera::new("b").into_ref();

        fx.attach_cameras(&mut engine, &[Rc::clone(&a), Rc::clone(&b)]).unwrap();
        assert_eq!(calls.get(), 1);
        let shared = fx.post_processes(None);
        assert!(Rc::ptr_eq(&shared[0], &a.borrow().active_post_processes()[0]));

        fx.detach_cameras(&mut engine, &[Rc::clone(&a)]);
        assert!(!shared[0].borrow().is_disposed());
        assert_eq!(b.borrow().active_post_processes().len(), 1);

        fx.detach_cameras(&mut engine, &[Rc::clone(&b)]);
        assert!(shared[0].borrow().is_disposed());
        assert!(fx.post_processes(None).is_empty());
    }

    #[test]
    fn disable_then_enable_restores_the_slot() {
        let mut engine = HeadlessEngine::default();
        let mut first = effect("first", false, Rc::new(Cell::new(0)));
        let mut second = effect("second", false, Rc::new(Cell::new(0)));
        let camera = Camera::new("main").into_ref();
        first.attach_cameras(&mut engine, &[Rc::clone(&camera)]).unwrap();
        second.attach_cameras(&mut engine, &[Rc::clone(&camera)]).unwrap();
        let pass = first.post_processes(Some(camera.borrow().id()))[0].clone();

        first.disable(&[Rc::clone(&camera)]);
        assert_eq!(camera.borrow().active_post_processes().len(), 1);
        assert!(!pass.borrow().is_disposed());

        first.enable(&[Rc::clone(&camera)]);
        first.enable(&[Rc::clone(&camera)]);
        assert_eq!(camera.borrow().slot_of(&pass), Some(0));
        assert_eq!(camera.borrow().active_post_processes().len(), 2);
    }

    #[test]
    fn factory_failure_propagates() {
        let mut engine = HeadlessEngine::default();
        let mut fx = PostProcessRenderEffect::new("broken", false, |_| {
            Err(crate::error::RenderError::InvalidConfiguration("no device support".into()))
        });
        let camera = Camera::new("main").into_ref();
        assert!(fx.attach_cameras(&mut engine, &[Rc::clone(&camera)]).is_err());
        assert!(!fx.is_attached_to(camera.borrow().id()));
    }

    #[test]
    fn unsupported_pass_makes_effect_unsupported() {
        let mut engine = HeadlessEngine::default();
        engine.fail_effect("bad");
        let mut fx = effect("bad", false, Rc::new(Cell::new(0)));
        let camera = Camera::new("main").into_ref();
        fx.attach_cameras(&mut engine, &[camera]).unwrap();
        assert!(fx.is_supported());
        fx.update(&mut engine);
        assert!(!fx.is_supported());
    }
}
