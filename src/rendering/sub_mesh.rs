//! Per-object render data consumed by rendering groups.
//!
//! These are narrow views: a [`Mesh`] carries what ordering needs (alpha index,
//! layer mask, rendering group, edge renderer), a [`Material`] carries its
//! alpha state, and a [`SubMesh`] ties a draw range to both. They are shared as
//! `Arc` so the scene's entity store can hold them as components.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec3};

fn next_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Process-unique mesh identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

/// Process-unique material identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(u64);

/// Draws a mesh's edges as an overlay after the transparent stage.
pub trait EdgesRenderer: Send + Sync {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// A particle system as seen by a rendering group. Simulation lives elsewhere.
pub trait ParticleSystem: Send + Sync {
    fn name(&self) -> &str;

    fn rendering_group_id(&self) -> u32 {
        0
    }

    fn is_started(&self) -> bool;

    fn layer_mask(&self) -> u32 {
        0x0FFF_FFFF
    }

    /// Mesh the particles are emitted from, `None` for a fixed position.
    fn emitter(&self) -> Option<MeshId> {
        None
    }
}

/// A batch of camera-facing sprites.
pub trait SpriteManager: Send + Sync {
    fn name(&self) -> &str;

    fn rendering_group_id(&self) -> u32 {
        0
    }

    fn layer_mask(&self) -> u32 {
        0x0FFF_FFFF
    }
}

pub struct Mesh {
    id: MeshId,
    pub name: String,
    /// Transparent draw order override; lower values draw first.
    pub alpha_index: i32,
    pub layer_mask: u32,
    pub rendering_group_id: u32,
    pub edges_renderer: Option<Arc<dyn EdgesRenderer>>,
}

impl Mesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: MeshId(next_id()),
            name: name.into(),
            alpha_index: i32::MAX,
            layer_mask: 0x0FFF_FFFF,
            rendering_group_id: 0,
            edges_renderer: None,
        }
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn with_alpha_index(mut self, alpha_index: i32) -> Self {
        self.alpha_index = alpha_index;
        self
    }

    pub fn with_layer_mask(mut self, layer_mask: u32) -> Self {
        self.layer_mask = layer_mask;
        self
    }

    pub fn with_rendering_group(mut self, group: u32) -> Self {
        self.rendering_group_id = group;
        self
    }

    pub fn with_edges_renderer(mut self, renderer: Arc<dyn EdgesRenderer>) -> Self {
        self.edges_renderer = Some(renderer);
        self
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("alpha_index", &self.alpha_index)
            .field("rendering_group_id", &self.rendering_group_id)
            .field("edges", &self.edges_renderer.as_ref().map(|e| e.name().to_string()))
            .finish()
    }
}

/// Alpha state of a material, which decides the bin its submeshes land in.
#[derive(Clone, Debug)]
pub struct Material {
    id: MaterialId,
    pub name: String,
    pub alpha: f32,
    /// Blend even when `alpha` is 1 (e.g. an alpha-carrying texture).
    pub alpha_blending: bool,
    pub alpha_test: bool,
    /// Only fill the depth buffer; color writes are disabled for these draws.
    pub depth_pre_pass_only: bool,
    /// Keep blended draws in the opaque path so they write depth.
    pub force_depth_write: bool,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: MaterialId(next_id()),
            name: name.into(),
            alpha: 1.0,
            alpha_blending: false,
            alpha_test: false,
            depth_pre_pass_only: false,
            force_depth_write: false,
        }
    }

    pub fn id(&self) -> MaterialId {
        self.id
    }

    pub fn needs_alpha_blending(&self) -> bool {
        self.alpha_blending || self.alpha < 1.0
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_alpha_blending(mut self, enabled: bool) -> Self {
        self.alpha_blending = enabled;
        self
    }

    pub fn with_alpha_test(mut self, enabled: bool) -> Self {
        self.alpha_test = enabled;
        self
    }

    pub fn with_depth_pre_pass_only(mut self, enabled: bool) -> Self {
        self.depth_pre_pass_only = enabled;
        self
    }

    pub fn with_force_depth_write(mut self, enabled: bool) -> Self {
        self.force_depth_write = enabled;
        self
    }
}

/// A contiguous draw range of a mesh with its own material.
#[derive(Clone, Debug)]
pub struct SubMesh {
    pub mesh: Arc<Mesh>,
    pub material: Option<Arc<Material>>,
    pub index_start: u32,
    pub index_count: u32,
    /// Center of the bounding sphere in mesh space.
    pub bounding_center: Vec3,
}

impl SubMesh {
    pub fn new(mesh: Arc<Mesh>, material: Option<Arc<Material>>) -> Self {
        Self {
            mesh,
            material,
            index_start: 0,
            index_count: 0,
            bounding_center: Vec3::ZERO,
        }
    }

    pub fn with_range(mut self, index_start: u32, index_count: u32) -> Self {
        self.index_start = index_start;
        self.index_count = index_count;
        self
    }

    pub fn with_bounding_center(mut self, center: Vec3) -> Self {
        self.bounding_center = center;
        self
    }

    pub fn world_center(&self, world: &Mat4) -> Vec3 {
        world.transform_point3(self.bounding_center)
    }
}

/// A submesh dispatched into a rendering group for the current frame.
#[derive(Clone, Debug)]
pub struct QueuedSubMesh {
    pub sub_mesh: Arc<SubMesh>,
    pub world_center: Vec3,
    pub alpha_index: i32,
    pub rendering_group_id: u32,
    /// Squared distance from the camera, refreshed before each sort.
    pub distance_to_camera: f32,
}

impl QueuedSubMesh {
    pub fn new(sub_mesh: Arc<SubMesh>, world_center: Vec3) -> Self {
        let alpha_index = sub_mesh.mesh.alpha_index;
        let rendering_group_id = sub_mesh.mesh.rendering_group_id;
        Self {
            sub_mesh,
            world_center,
            alpha_index,
            rendering_group_id,
            distance_to_camera: 0.0,
        }
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.sub_mesh.mesh
    }

    pub fn update_distance(&mut self, camera_position: Vec3) {
        self.distance_to_camera = self.world_center.distance_squared(camera_position);
    }
}
