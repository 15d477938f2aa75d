use indexmap::IndexMap;

use super::render_pipeline::PostProcessRenderPipeline;
use crate::camera::CameraRef;
use crate::engine::Engine;
use crate::error::{RenderError, RenderResult};

/// Registry of a scene's render pipelines, keyed by name.
#[derive(Debug, Default)]
pub struct PostProcessRenderPipelineManager {
    pipelines: IndexMap<String, PostProcessRenderPipeline>,
}

impl PostProcessRenderPipelineManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pipeline. A pipeline with the same name is replaced.
    pub fn add_pipeline(&mut self, pipeline: PostProcessRenderPipeline) {
        log::debug!("Registering render pipeline '{}'", pipeline.name);
        self.pipelines.insert(pipeline.name.clone(), pipeline);
    }

    pub fn pipeline(&self, name: &str) -> Option<&PostProcessRenderPipeline> {
        self.pipelines.get(name)
    }

    pub fn pipeline_mut(&mut self, name: &str) -> Option<&mut PostProcessRenderPipeline> {
        self.pipelines.get_mut(name)
    }

    pub fn supported_pipelines(&self) -> Vec<&PostProcessRenderPipeline> {
        self.pipelines.values().filter(|p| p.is_supported()).collect()
    }

    fn require(&mut self, name: &str) -> RenderResult<&mut PostProcessRenderPipeline> {
        self.pipelines
            .get_mut(name)
            .ok_or_else(|| RenderError::UnknownPipeline(name.to_string()))
    }

    pub fn attach_cameras_to_render_pipeline(
        &mut self,
        engine: &mut dyn Engine,
        name: &str,
        cameras: &[CameraRef],
        unique: bool,
    ) -> RenderResult<()> {
        self.require(name)?.attach_cameras(engine, cameras, unique)
    }

    pub fn detach_cameras_from_render_pipeline(
        &mut self,
        engine: &mut dyn Engine,
        name: &str,
        cameras: &[CameraRef],
    ) -> RenderResult<()> {
        self.require(name)?.detach_cameras(engine, cameras);
        Ok(())
    }

    pub fn enable_effect_in_pipeline(&mut self, name: &str, effect: &str, cameras: &[CameraRef]) -> RenderResult<()> {
        self.require(name)?.enable_effect(effect, cameras)
    }

    pub fn disable_effect_in_pipeline(&mut self, name: &str, effect: &str, cameras: &[CameraRef]) -> RenderResult<()> {
        self.require(name)?.disable_effect(effect, cameras)
    }

    /// Once per frame: revalidates every pipeline and drops the ones that turned
    /// out unsupported on this device.
    pub fn update(&mut self, engine: &mut dyn Engine) {
        let mut unsupported = Vec::new();
        for (name, pipeline) in &mut self.pipelines {
            pipeline.update(engine);
            if !pipeline.is_supported() {
                unsupported.push(name.clone());
            }
        }
        for name in unsupported {
            if let Some(mut pipeline) = self.pipelines.shift_remove(&name) {
                log::warn!("Render pipeline '{}' is not supported and was removed", name);
                pipeline.dispose(engine);
            }
        }
    }

    /// Rebuilds every pipeline after a device loss, in registration order.
    pub fn rebuild(&mut self, engine: &mut dyn Engine) {
        for pipeline in self.pipelines.values_mut() {
            pipeline.rebuild(engine);
        }
    }

    pub fn dispose(&mut self, engine: &mut dyn Engine) {
        for pipeline in self.pipelines.values_mut() {
            pipeline.dispose(engine);
        }
        self.pipelines.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::camera::Camera;
    use crate::engine::HeadlessEngine;
    use crate::postprocess::render_pipeline::PostProcessRenderEffect;
    use crate::postprocess::{PostProcess, PostProcessOptions};

    fn pipeline_with(name: &str, pass: &'static str) -> PostProcessRenderPipeline {
        let mut pipeline = PostProcessRenderPipeline::new(name);
        pipeline.add_effect(PostProcessRenderEffect::new(pass, false, move |engine| {
            Ok(vec![
                PostProcess::new(engine, pass, "", PostProcessOptions::new()).into_ref(),
            ])
        }));
        pipeline
    }

    #[test]
    fn unknown_pipeline_is_an_error() {
        let mut engine = HeadlessEngine::default();
        let mut manager = PostProcessRenderPipelineManager::new();
        let result = manager.attach_cameras_to_render_pipeline(&mut engine, "nope", &[], false);
        assert!(matches!(result, Err(RenderError::UnknownPipeline(_))));
    }

    #[test]
    fn update_drops_unsupported_pipelines() {
        let mut engine = HeadlessEngine::default();
        engine.fail_effect("broken");
        let camera = Camera::new("main").into_ref();
        let mut manager = PostProcessRenderPipelineManager::new();
        manager.add_pipeline(pipeline_with("good", "copy"));
        manager.add_pipeline(pipeline_with("bad", "broken"));
        for name in ["good", "bad"] {
            manager
                .attach_cameras_to_render_pipeline(&mut engine, name, &[Rc::clone(&camera)], false)
                .unwrap();
        }
        assert_eq!(camera.borrow().active_post_processes().len(), 2);

        manager.update(&mut engine);
        assert!(manager.pipeline("good").is_some());
        assert!(manager.pipeline("bad").is_none());
        assert_eq!(manager.supported_pipelines().len(), 1);
        assert_eq!(camera.borrow().active_post_processes().len(), 1);
    }

    #[test]
    fn disable_and_enable_through_manager() {
        let mut engine = HeadlessEngine::default();
        let camera = Camera::new("main").into_ref();
        let mut manager = PostProcessRenderPipelineManager::new();
        manager.add_pipeline(pipeline_with("fx", "copy"));
        manager
            .attach_cameras_to_render_pipeline(&mut engine, "fx", &[Rc::clone(&camera)], true)
            .unwrap();

        manager
            .disable_effect_in_pipeline("fx", "copy", &[Rc::clone(&camera)])
            .unwrap();
        assert!(camera.borrow().active_post_processes().is_empty());
        manager
            .enable_effect_in_pipeline("fx", "copy", &[Rc::clone(&camera)])
            .unwrap();
        assert_eq!(camera.borrow().active_post_processes().len(), 1);

        manager
            .detach_cameras_from_render_pipeline(&mut engine, "fx", &[Rc::clone(&camera)])
            .unwrap();
        assert!(camera.borrow().active_post_processes().is_empty());

        manager.dispose(&mut engine);
        manager.dispose(&mut engine);
        assert!(manager.pipeline("fx").is_none());
    }
}
