//! # sahbvh
//!
//! Parallel construction of bounding volume hierarchies with a binned
//! surface-area heuristic.
//!
//! The builder consumes a mutable array of primitive references (bounds +
//! opaque id), permutes it into leaf order, and drives host callbacks that
//! encode internal nodes and leaves into an arena. Tree layout and node
//! encoding stay entirely on the host side; the crate owns the split
//! policy, the parallel binning/partitioning machinery, and the arena.
//!
//! ## Modules
//!
//! - [`util`] - Basic types (errors, bounding boxes, glam re-exports)
//! - [`arena`] - Bump arena with per-task sub-allocators
//! - [`parallel`] - Fork-join reduce/for-each and in-place partition
//! - [`builder`] - Binner, partitioner, and the recursive driver
//!
//! ## Example
//!
//! ```ignore
//! use sahbvh::prelude::*;
//!
//! let mut prims: Vec<PrimRef> = gather_scene_bounds();
//! let pinfo = PrimInfo::from_prims(&prims);
//! let arena = Arena::new();
//! let root = build(
//!     &mut prims,
//!     pinfo,
//!     &BuildSettings::default(),
//!     &arena,
//!     |children, alloc| encode_node(children, alloc),
//!     |range, prims, alloc| encode_leaf(range, prims, alloc),
//!     |_| BuildProgress::Continue,
//! )?;
//! ```

pub mod arena;
pub mod builder;
pub mod parallel;
pub mod util;

// Re-export commonly used types
pub use arena::{Arena, ThreadArena};
pub use builder::{build, BuildProgress, BuildSettings, PrimInfo, PrimRef, Primitive};
pub use util::{BBox3a, Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::arena::{Arena, ThreadArena};
    pub use crate::builder::{
        build, BuildProgress, BuildSettings, CentGeom, PrimInfo, PrimRef, Primitive,
    };
    pub use crate::util::{BBox3a, Error, Result, Vec3A};
}
