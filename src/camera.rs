use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec3};

use crate::engine::TextureId;
use crate::postprocess::PostProcessRef;

/// Shared handle to a camera. Render effects attach post-processes through it.
pub type CameraRef = Rc<RefCell<Camera>>;

/// Process-unique camera identifier.
///
/// Post-processes and render effects key their per-camera state on this id
/// instead of holding the camera itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CameraId(u64);

impl CameraId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A simple camera for 3D scenes.
///
/// Provides position, orientation, and field of view, plus the ordered chain of
/// post-processes applied to its output. The chain is a list of slots: detaching a
/// post-process empties its slot rather than shifting the others, so a render
/// effect can later restore a pass at the slot it originally occupied.
pub struct Camera {
    id: CameraId,
    pub name: String,
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub fov: f32, // radians
    /// Bit mask matched against mesh, sprite, and particle layer masks.
    pub layer_mask: u32,
    /// Texture the camera renders into, or `None` for the screen.
    pub output_render_target: Option<TextureId>,
    post_processes: Vec<Option<PostProcessRef>>,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            id: CameraId::next(),
            name: String::from("camera"),
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_2, // 90 degrees
            layer_mask: 0x0FFF_FFFF,
            output_render_target: None,
            post_processes: Vec::new(),
        }
    }
}

impl Camera {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Wraps the camera into a shared [`CameraRef`].
    pub fn into_ref(self) -> CameraRef {
        Rc::new(RefCell::new(self))
    }

    pub fn id(&self) -> CameraId {
        self.id
    }

    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Vec3::new(x, y, z);
        self
    }

    pub fn looking_at(mut self, target_x: f32, target_y: f32, target_z: f32) -> Self {
        self.forward = (Vec3::new(target_x, target_y, target_z) - self.position).normalize_or_zero();
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn with_layer_mask(mut self, mask: u32) -> Self {
        self.layer_mask = mask;
        self
    }

    /// Compute the right vector from forward and up.
    pub fn right(&self) -> Vec3 {
        self.forward.cross(self.up).normalize_or_zero()
    }

    /// Recompute up to be orthogonal to forward and right.
    pub fn orthogonal_up(&self) -> Vec3 {
        self.right().cross(self.forward).normalize_or_zero()
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    /// Right-handed perspective with wgpu's 0..1 depth range.
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect, 0.1, 1000.0)
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }

    /// Inserts a post-process into the chain and returns the slot it occupies.
    ///
    /// Without `insert_at` the pass is appended. With `insert_at`, an empty slot at
    /// that index is filled in place; an occupied slot shifts the rest of the chain.
    pub fn attach_post_process(&mut self, post_process: PostProcessRef, insert_at: Option<usize>) -> usize {
        match insert_at {
            None => {
                self.post_processes.push(Some(post_process));
                self.post_processes.len() - 1
            }
            Some(index) if index >= self.post_processes.len() => {
                self.post_processes.resize(index, None);
                self.post_processes.push(Some(post_process));
                index
            }
            Some(index) if self.post_processes[index].is_none() => {
                self.post_processes[index] = Some(post_process);
                index
            }
            Some(index) => {
                self.post_processes.insert(index, Some(post_process));
                index
            }
        }
    }

    /// Empties the slot holding `post_process`. Returns the freed slot index.
    pub fn detach_post_process(&mut self, post_process: &PostProcessRef) -> Option<usize> {
        let index = self.slot_of(post_process)?;
        self.post_processes[index] = None;
        Some(index)
    }

    /// Slot index of `post_process`, if it is attached.
    pub fn slot_of(&self, post_process: &PostProcessRef) -> Option<usize> {
        self.post_processes
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|p| Rc::ptr_eq(p, post_process)))
    }

    pub fn is_slot_occupied(&self, index: usize) -> bool {
        self.post_processes.get(index).is_some_and(Option::is_some)
    }

    /// Attached post-processes in chain order, skipping empty slots.
    pub fn active_post_processes(&self) -> Vec<PostProcessRef> {
        self.post_processes.iter().flatten().cloned().collect()
    }

    /// First attached post-process: the one the scene renders into.
    pub fn first_post_process(&self) -> Option<&PostProcessRef> {
        self.post_processes.iter().flatten().next()
    }

    /// Position of `post_process` among the active (non-empty) slots.
    pub fn active_index_of(&self, post_process: &PostProcessRef) -> Option<usize> {
        self.post_processes
            .iter()
            .flatten()
            .position(|p| Rc::ptr_eq(p, post_process))
    }

    /// Total slot count, including empty slots.
    pub fn slot_count(&self) -> usize {
        self.post_processes.len()
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("position", &self.position)
            .field("post_processes", &self.post_processes.iter().flatten().count())
            .finish()
    }
}
