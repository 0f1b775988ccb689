//! Math type re-exports and bounding-box utilities.
//!
//! This module re-exports the vector types from `glam` used throughout the
//! crate and provides the aligned bounding box the builder operates on.

// Re-export glam types
pub use glam::{
    // Scalar-layout vectors
    Vec3,
    // 16-byte aligned vectors (one SIMD register, three live lanes)
    Vec3A,
    // Integer vectors
    IVec3, UVec3,
};

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// 3D bounding box over [`Vec3A`].
///
/// The empty box is inverted (`min = +inf`, `max = -inf`) and is the
/// identity of the extend operations: extending any box by the empty box
/// leaves it unchanged.
#[derive(Clone, Copy, PartialEq)]
#[repr(C)]
pub struct BBox3a {
    pub min: Vec3A,
    pub max: Vec3A,
}

// Safety: two 16-byte Vec3A fields, 32 bytes total, no padding; every bit
// pattern is a valid set of f32 lanes.
unsafe impl Zeroable for BBox3a {}
unsafe impl Pod for BBox3a {}

impl BBox3a {
    /// Empty bounding box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: Vec3A::splat(f32::INFINITY),
        max: Vec3A::splat(f32::NEG_INFINITY),
    };

    /// Create a new bounding box from min and max points.
    #[inline]
    pub const fn new(min: Vec3A, max: Vec3A) -> Self {
        Self { min, max }
    }

    /// Create a bounding box from a single point.
    #[inline]
    pub fn from_point(p: Vec3A) -> Self {
        Self { min: p, max: p }
    }

    /// Check if this box is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand this box to include a point.
    #[inline]
    pub fn expand_by_point(&mut self, p: Vec3A) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Expand this box to include another box.
    ///
    /// Branch-free: the inverted representation of the empty box makes the
    /// componentwise min/max a no-op for empty operands.
    #[inline]
    pub fn expand_by_box(&mut self, other: &Self) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Get the center of the box.
    #[inline]
    pub fn center(&self) -> Vec3A {
        (self.min + self.max) * 0.5
    }

    /// Twice the center (`min + max`). The builder quantizes centroids in
    /// this form to avoid the multiply on the hot path; binning and
    /// partitioning must both use it so the two agree bit-for-bit.
    #[inline]
    pub fn center2(&self) -> Vec3A {
        self.min + self.max
    }

    /// Get the size (extents) of the box.
    #[inline]
    pub fn size(&self) -> Vec3A {
        self.max - self.min
    }

    /// Half of the surface area. The empty box reports 0.
    #[inline]
    pub fn half_area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.max - self.min;
        d.x * d.y + d.x * d.z + d.y * d.z
    }
}

impl Default for BBox3a {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for BBox3a {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BBox3a({:?} - {:?})", self.min, self.max)
    }
}
