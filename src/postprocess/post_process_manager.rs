use super::post_process::PostProcessRef;
use crate::camera::Camera;
use crate::engine::{Engine, FrameTarget, TextureId};

/// Drives a camera's post-process chain for one frame.
///
/// [`prepare_frame`](Self::prepare_frame) runs before the scene renders and redirects
/// it into the first pass. [`finalize_frame`](Self::finalize_frame) runs after and
/// ping-pongs through the chain: pass `i + 1` is activated (binding its input as the
/// framebuffer) and pass `i` is applied and drawn into it. The last pass draws into
/// the final target.
#[derive(Debug, Default)]
pub struct PostProcessManager {
    disposed: bool,
}

impl PostProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activates the first pass of the camera's chain so the scene renders into it.
    ///
    /// Returns `false` when the chain is empty or the first pass could not provide a
    /// texture; the caller then renders straight to its own target.
    pub fn prepare_frame(&mut self, engine: &mut dyn Engine, camera: &Camera, source_texture: Option<TextureId>) -> bool {
        if self.disposed {
            return false;
        }
        let Some(first) = camera.first_post_process() else {
            return false;
        };
        first
            .borrow_mut()
            .activate(engine, camera, source_texture, true)
            .is_some()
    }

    /// Runs the camera's chain, ending in `target` (the screen when `None`).
    ///
    /// With `do_not_present` only the next pass is activated and nothing is drawn.
    /// Returns the number of passes drawn.
    pub fn finalize_frame(
        &mut self,
        engine: &mut dyn Engine,
        camera: &Camera,
        target: Option<TextureId>,
        do_not_present: bool,
    ) -> usize {
        if self.disposed {
            return 0;
        }
        let post_processes = camera.active_post_processes();
        self.run_chain(engine, camera, &post_processes, target, do_not_present)
    }

    /// Renders `post_processes` in order without a prior [`prepare_frame`](Self::prepare_frame).
    ///
    /// The first pass is expected to be activated and filled by the caller.
    pub fn direct_render(
        &mut self,
        engine: &mut dyn Engine,
        camera: &Camera,
        post_processes: &[PostProcessRef],
        target: Option<TextureId>,
    ) -> usize {
        if self.disposed {
            return 0;
        }
        self.run_chain(engine, camera, post_processes, target, false)
    }

    fn run_chain(
        &mut self,
        engine: &mut dyn Engine,
        camera: &Camera,
        post_processes: &[PostProcessRef],
        target: Option<TextureId>,
        do_not_present: bool,
    ) -> usize {
        let mut drawn = 0;
        for (index, post_process) in post_processes.iter().enumerate() {
            match post_processes.get(index + 1) {
                Some(next) => {
                    if next.borrow_mut().activate(engine, camera, target, false).is_none() {
                        log::trace!("'{}' has no output this frame", next.borrow().name);
                    }
                }
                None => {
                    let frame_target = target.map_or(FrameTarget::Screen, FrameTarget::Texture);
                    engine.bind_framebuffer(frame_target, None);
                }
            }
            if do_not_present {
                break;
            }

            let mut post_process = post_process.borrow_mut();
            let Some(effect) = post_process.apply(engine) else {
                continue;
            };
            post_process.on_before_render.notify(&effect);
            match engine.draw_fullscreen_quad() {
                Ok(()) => drawn += 1,
                Err(err) => log::warn!("Post-process '{}' draw failed: {}", post_process.name, err),
            }
            post_process.on_after_render.notify(&effect);
        }
        engine.set_alpha_mode(crate::engine::AlphaMode::Disabled);
        drawn
    }

    pub fn dispose(&mut self) {
        self.disposed = true;
    }
}
