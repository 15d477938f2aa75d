//! Rendering groups: per-frame bucketing, ordering, and draw submission.
//!
//! A scene dispatches every visible submesh into the [`RenderingManager`], which
//! routes it to the [`RenderingGroup`] named by its mesh. Each group keeps four
//! queues (opaque, alpha-test, transparent, depth-only), sorts them with its
//! [`SortPolicy`] slots, and hands the draws to a [`GroupRenderer`] in a fixed
//! stage order.

mod rendering_group;
mod rendering_manager;
mod sort;
mod sub_mesh;

pub use self::rendering_group::{CustomRenderFunction, GroupRenderer, RenderQueues, RenderStage, RenderingGroup};
pub use self::rendering_manager::{MAX_RENDERING_GROUPS, RenderingManager};
pub use self::sort::{
    SortCompareFn, SortPolicy, back_to_front_sort_compare, default_transparent_sort_compare,
    front_to_back_sort_compare,
};
pub use self::sub_mesh::{
    EdgesRenderer, Material, MaterialId, Mesh, MeshId, ParticleSystem, QueuedSubMesh, SpriteManager, SubMesh,
};
