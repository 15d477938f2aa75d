//! ECS components read by the scene driver.
//!
//! Entities with a [`Renderable`] are dispatched every frame. A [`Transform`]
//! places them in the world (identity when absent) and a [`Visibility`] can hide
//! them without despawning.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use strata::glam::Vec3;
//! use strata::rendering::{Material, Mesh, SubMesh};
//! use strata::scene::{Renderable, Scene, Transform};
//!
//! let mut scene = Scene::new();
//! let mesh = Arc::new(Mesh::new("crate"));
//! let sub_mesh = SubMesh::new(Arc::clone(&mesh), Some(Arc::new(Material::new("wood"))));
//! scene.world.spawn((
//!     Transform::new().position(Vec3::new(0.0, 0.0, -5.0)),
//!     Renderable::new(mesh).with_sub_mesh(sub_mesh),
//! ));
//! ```

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};

use crate::rendering::{Mesh, SubMesh};

/// Position, rotation, and scale of an entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    /// World matrix in SRT order.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// A mesh and the submeshes drawn for it.
#[derive(Clone, Debug)]
pub struct Renderable {
    pub mesh: Arc<Mesh>,
    pub sub_meshes: Vec<Arc<SubMesh>>,
}

impl Renderable {
    pub fn new(mesh: Arc<Mesh>) -> Self {
        Self {
            mesh,
            sub_meshes: Vec::new(),
        }
    }

    pub fn with_sub_mesh(mut self, sub_mesh: SubMesh) -> Self {
        self.sub_meshes.push(Arc::new(sub_mesh));
        self
    }
}

/// Hides an entity from every camera while `visible` is false.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Visibility {
    pub visible: bool,
}

impl Default for Visibility {
    fn default() -> Self {
        Self { visible: true }
    }
}

impl Visibility {
    pub fn hidden() -> Self {
        Self { visible: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_matrix_applies_scale_then_translation() {
        let transform = Transform::new()
            .position(Vec3::new(1.0, 0.0, 0.0))
            .uniform_scale(2.0);
        let p = transform.matrix().transform_point3(Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(p, Vec3::new(3.0, 2.0, 0.0));
    }
}
