use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::render_effect::PostProcessRenderEffect;
use crate::camera::{Camera, CameraId, CameraRef};
use crate::engine::Engine;
use crate::error::{RenderError, RenderResult};
use crate::postprocess::{PostProcess, PostProcessRef};

/// An ordered composition of render effects attached to one or more cameras.
///
/// Effects attach in declaration order, so their passes land in each camera's
/// chain in that order. The pipeline keeps a rebuild list in which every pass
/// sharing another pass's output comes after that pass.
pub struct PostProcessRenderPipeline {
    pub name: String,
    effects: IndexMap<String, PostProcessRenderEffect>,
    cameras: Vec<(CameraId, Weak<RefCell<Camera>>)>,
    rebuild_order: Vec<Weak<RefCell<PostProcess>>>,
    disposed: bool,
}

impl PostProcessRenderPipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            effects: IndexMap::new(),
            cameras: Vec::new(),
            rebuild_order: Vec::new(),
            disposed: false,
        }
    }

    /// Appends an effect. An effect with the same name is replaced in place.
    pub fn add_effect(&mut self, effect: PostProcessRenderEffect) {
        self.effects.insert(effect.name.clone(), effect);
    }

    pub fn effect(&self, name: &str) -> Option<&PostProcessRenderEffect> {
        self.effects.get(name)
    }

    pub fn effects(&self) -> impl Iterator<Item = &PostProcessRenderEffect> {
        self.effects.values()
    }

    /// Cameras currently attached and still alive.
    pub fn cameras(&self) -> Vec<CameraRef> {
        self.cameras.iter().filter_map(|(_, camera)| camera.upgrade()).collect()
    }

    pub fn is_attached_to(&self, camera: CameraId) -> bool {
        self.cameras.iter().any(|(id, _)| *id == camera)
    }

    pub fn is_supported(&self) -> bool {
        self.effects.values().all(PostProcessRenderEffect::is_supported)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Attaches every effect to `cameras`, in declaration order.
    ///
    /// With `unique`, cameras the pipeline already knows are skipped. On the first
    /// failing effect the call stops: earlier effects stay attached and the error
    /// names the failing effect.
    pub fn attach_cameras(&mut self, engine: &mut dyn Engine, cameras: &[CameraRef], unique: bool) -> RenderResult<()> {
        if self.disposed {
            return Err(RenderError::Disposed(self.name.clone()));
        }

        let mut targets = Vec::with_capacity(cameras.len());
        for camera in cameras {
            let id = camera.borrow().id();
            if !self.is_attached_to(id) {
                self.cameras.push((id, Rc::downgrade(camera)));
                targets.push(Rc::clone(camera));
            } else if !unique {
                targets.push(Rc::clone(camera));
            }
        }

        let mut result = Ok(());
        for (name, effect) in &mut self.effects {
            if let Err(source) = effect.attach_cameras(engine, &targets) {
                log::error!("Pipeline '{}': effect '{}' failed to attach: {}", self.name, name, source);
                result = Err(RenderError::EffectAttach {
                    effect: name.clone(),
                    source: Box::new(source),
                });
                break;
            }
        }
        self.compute_rebuild_order();
        result
    }

    /// Detaches every effect from `cameras`, disposing what was created for them.
    pub fn detach_cameras(&mut self, engine: &mut dyn Engine, cameras: &[CameraRef]) {
        for effect in self.effects.values_mut() {
            effect.detach_cameras(engine, cameras);
        }
        for camera in cameras {
            let id = camera.borrow().id();
            self.cameras.retain(|(known, _)| *known != id);
        }
        self.compute_rebuild_order();
    }

    pub fn enable_effect(&mut self, name: &str, cameras: &[CameraRef]) -> RenderResult<()> {
        let effect = self
            .effects
            .get_mut(name)
            .ok_or_else(|| RenderError::UnknownEffect(name.to_string()))?;
        effect.enable(cameras);
        Ok(())
    }

    pub fn disable_effect(&mut self, name: &str, cameras: &[CameraRef]) -> RenderResult<()> {
        let effect = self
            .effects
            .get_mut(name)
            .ok_or_else(|| RenderError::UnknownEffect(name.to_string()))?;
        effect.disable(cameras);
        Ok(())
    }

    /// Per-frame revalidation. Nothing is drawn here.
    pub fn update(&mut self, engine: &mut dyn Engine) {
        self.cameras.retain(|(_, camera)| camera.strong_count() > 0);
        for effect in self.effects.values_mut() {
            effect.update(engine);
        }
    }

    /// Every live pass of the pipeline, owners before the passes sharing their output.
    pub fn rebuild_order(&self) -> Vec<PostProcessRef> {
        self.rebuild_order.iter().filter_map(Weak::upgrade).collect()
    }

    fn compute_rebuild_order(&mut self) {
        let mut remaining: Vec<PostProcessRef> = Vec::new();
        for pp in self.effects.values().flat_map(PostProcessRenderEffect::all_post_processes) {
            if !remaining.iter().any(|known| Rc::ptr_eq(known, pp)) {
                remaining.push(Rc::clone(pp));
            }
        }

        let mut ordered = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            // Earliest pass whose output owner is already placed (or outside the pipeline).
            let next = remaining
                .iter()
                .position(|pp| match pp.borrow().shared_output_owner() {
                    Some(owner) => !remaining.iter().any(|other| Rc::ptr_eq(other, &owner)),
                    None => true,
                })
                .unwrap_or(0);
            ordered.push(Rc::downgrade(&remaining.remove(next)));
        }
        self.rebuild_order = ordered;
    }

    /// Recreates textures and effects after a device loss, in rebuild order.
    pub fn rebuild(&mut self, engine: &mut dyn Engine) {
        self.compute_rebuild_order();
        for pp in self.rebuild_order() {
            pp.borrow_mut().rebuild(engine);
        }
    }

    /// Detaches all cameras and disposes every effect. Repeated calls are no-ops.
    pub fn dispose(&mut self, engine: &mut dyn Engine) {
        if self.disposed {
            return;
        }
        let cameras = self.cameras();
        for effect in self.effects.values_mut() {
            effect.detach_cameras(engine, &cameras);
            effect.dispose(engine);
        }
        self.effects.clear();
        self.cameras.clear();
        self.rebuild_order.clear();
        self.disposed = true;
        log::debug!("Pipeline '{}' disposed", self.name);
    }
}

impl std::fmt::Debug for PostProcessRenderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessRenderPipeline")
            .field("name", &self.name)
            .field("effects", &self.effects.keys().collect::<Vec<_>>())
            .field("cameras", &self.cameras.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HeadlessEngine;
    use crate::postprocess::PostProcessOptions;

    fn simple_effect(name: &'static str) -> PostProcessRenderEffect {
        PostProcessRenderEffect::new(name, false, move |engine| {
            Ok(vec![
                PostProcess::new(engine, name, "", PostProcessOptions::new()).into_ref(),
            ])
        })
    }

    fn pipeline(names: &[&'static str]) -> PostProcessRenderPipeline {
        let mut pipeline = PostProcessRenderPipeline::new("test");
        for name in names {
            pipeline.add_effect(simple_effect(name));
        }
        pipeline
    }

    #[test]
    fn effects_attach_in_declaration_order() {
        let mut engine = HeadlessEngine::default();
        let camera = Camera::new("main").into_ref();
        let mut pipeline = pipeline(&["copy", "blur", "combine"]);
        pipeline.attach_cameras(&mut engine, &[Rc::clone(&camera)], false).unwrap();

        let names: Vec<String> = camera
            .borrow()
            .active_post_processes()
            .iter()
            .map(|pp| pp.borrow().name.clone())
            .collect();
        assert_eq!(names, vec!["copy", "blur", "combine"]);
        assert!(pipeline.is_attached_to(camera.borrow().id()));
    }

    #[test]
    fn failing_effect_leaves_earlier_effects_attached() {
        let mut engine = HeadlessEngine::default();
        let camera = Camera::new("main").into_ref();
        let mut pipeline = pipeline(&["copy"]);
        pipeline.add_effect(PostProcessRenderEffect::new("unsupported", false, |_| {
            Err(RenderError::InvalidConfiguration("missing feature".into()))
        }));
        pipeline.add_effect(simple_effect("combine"));

        let err = pipeline
            .attach_cameras(&mut engine, &[Rc::clone(&camera)], false)
            .unwrap_err();
        assert!(matches!(err, RenderError::EffectAttach { ref effect, .. } if effect == "unsupported"));
        let id = camera.borrow().id();
        assert!(pipeline.effect("copy").is_some_and(|e| e.is_attached_to(id)));
        assert!(pipeline.effect("combine").is_some_and(|e| !e.is_attached_to(id)));
        assert_eq!(camera.borrow().active_post_processes().len(), 1);
    }

    #[test]
    fn rebuild_order_places_owners_first() {
        let mut engine = HeadlessEngine::default();
        let camera = Camera::new("main").into_ref();
        let owner_slot: Rc<RefCell<Option<PostProcessRef>>> = Rc::new(RefCell::new(None));

        let mut pipeline = PostProcessRenderPipeline::new("aliasing");
        let slot = Rc::clone(&owner_slot);
        pipeline.add_effect(PostProcessRenderEffect::new("alias", true, move |engine| {
            let owner = PostProcess::new(engine, "owner", "", PostProcessOptions::new()).into_ref();
            let alias = PostProcess::new(engine, "alias", "", PostProcessOptions::new()).into_ref();
            alias.borrow_mut().share_output_with(engine, &owner)?;
            *slot.borrow_mut() = Some(Rc::clone(&owner));
            Ok(vec![alias])
        }));
        let slot = Rc::clone(&owner_slot);
        pipeline.add_effect(PostProcessRenderEffect::new("owner", true, move |_| {
            Ok(slot.borrow().iter().cloned().collect())
        }));
        pipeline.attach_cameras(&mut engine, &[Rc::clone(&camera)], true).unwrap();

        let order: Vec<String> = pipeline
            .rebuild_order()
            .iter()
            .map(|pp| pp.borrow().name.clone())
            .collect();
        assert_eq!(order, vec!["owner", "alias"]);
    }

    #[test]
    fn detach_disposes_every_pass_of_the_camera() {
        let mut engine = HeadlessEngine::default();
        let camera = Camera::new("main").into_ref();
        let mut pipeline = pipeline(&["copy", "blur", "combine"]);
        pipeline.attach_cameras(&mut engine, &[Rc::clone(&camera)], false).unwrap();
        let passes = camera.borrow().active_post_processes();
        for pp in &passes {
            pp.borrow_mut().activate(&mut engine, &camera.borrow(), None, false);
        }
        assert_eq!(engine.live_texture_count(), 3);

        pipeline.detach_cameras(&mut engine, &[Rc::clone(&camera)]);
        assert!(passes.iter().all(|pp| pp.borrow().is_disposed()));
        assert_eq!(engine.live_texture_count(), 0);
        assert_eq!(engine.live_effect_count(), 0);
        assert!(camera.borrow().active_post_processes().is_empty());
        assert!(pipeline.rebuild_order().is_empty());
    }

    #[test]
    fn unknown_effect_is_reported() {
        let mut pipeline = pipeline(&["copy"]);
        assert!(matches!(
            pipeline.enable_effect("missing", &[]),
            Err(RenderError::UnknownEffect(_))
        ));
    }

    #[test]
    fn dispose_twice_is_harmless() {
        let mut engine = HeadlessEngine::default();
        let camera = Camera::new("main").into_ref();
        let mut pipeline = pipeline(&["copy"]);
        pipeline.attach_cameras(&mut engine, &[Rc::clone(&camera)], false).unwrap();

        pipeline.dispose(&mut engine);
        let calls = engine.calls().len();
        pipeline.dispose(&mut engine);
        assert_eq!(engine.calls().len(), calls);
        assert!(camera.borrow().active_post_processes().is_empty());
        assert!(matches!(
            pipeline.attach_cameras(&mut engine, &[camera], false),
            Err(RenderError::Disposed(_))
        ));
    }
}
