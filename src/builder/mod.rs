//! Binned-SAH BVH construction.
//!
//! - [`primref`] - Primitive references and range aggregates
//! - [`binning`] - Split search and partitioning
//! - [`fallback`] - Object-median fallback split
//! - [`sah`] - Recursive builder driver and entry point

pub mod binning;
pub mod fallback;
pub mod primref;
pub mod sah;

pub use binning::{find, find_parallel, find_with_info, Mapping, Split, SplitInfo, MAX_BINS};
pub use primref::{CentGeom, PrimInfo, PrimRef, Primitive};
pub use sah::{build, BuildProgress, BuildSettings};
