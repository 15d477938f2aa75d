//! Queue ordering policies.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::sub_mesh::QueuedSubMesh;

pub type SortCompareFn = Rc<dyn Fn(&QueuedSubMesh, &QueuedSubMesh) -> Ordering>;

/// How a rendering-group queue is ordered before drawing.
///
/// Sorting is always stable: entries that compare equal keep dispatch order.
#[derive(Clone, Default)]
pub enum SortPolicy {
    /// Dispatch order.
    #[default]
    NoSort,
    Custom(SortCompareFn),
}

impl SortPolicy {
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&QueuedSubMesh, &QueuedSubMesh) -> Ordering + 'static,
    {
        SortPolicy::Custom(Rc::new(compare))
    }

    /// Rendering group, then alpha index, then farthest first.
    pub fn default_transparent() -> Self {
        Self::custom(default_transparent_sort_compare)
    }

    pub fn back_to_front() -> Self {
        Self::custom(back_to_front_sort_compare)
    }

    pub fn front_to_back() -> Self {
        Self::custom(front_to_back_sort_compare)
    }

    pub fn is_sorted(&self) -> bool {
        matches!(self, SortPolicy::Custom(_))
    }

    pub fn sort(&self, queue: &mut [QueuedSubMesh]) {
        if let SortPolicy::Custom(compare) = self {
            queue.sort_by(|a, b| compare(a, b));
        }
    }
}

impl fmt::Debug for SortPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortPolicy::NoSort => f.write_str("NoSort"),
            SortPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Default transparent ordering: rendering group id, then alpha index ascending,
/// then distance to camera descending.
pub fn default_transparent_sort_compare(a: &QueuedSubMesh, b: &QueuedSubMesh) -> Ordering {
    a.rendering_group_id
        .cmp(&b.rendering_group_id)
        .then(a.alpha_index.cmp(&b.alpha_index))
        .then_with(|| back_to_front_sort_compare(a, b))
}

/// Farthest from the camera first.
pub fn back_to_front_sort_compare(a: &QueuedSubMesh, b: &QueuedSubMesh) -> Ordering {
    b.distance_to_camera.total_cmp(&a.distance_to_camera)
}

/// Nearest to the camera first.
pub fn front_to_back_sort_compare(a: &QueuedSubMesh, b: &QueuedSubMesh) -> Ordering {
    a.distance_to_camera.total_cmp(&b.distance_to_camera)
}
