//! Primitive references and range aggregates.

use crate::parallel::parallel_reduce;
use crate::util::{BBox3a, Vec3A};

/// Anything the builder can bin: a bounding box plus the doubled centroid
/// derived from it.
///
/// Implementations are monomorphized into the binning and partitioning
/// loops; there is no dynamic dispatch on the hot path.
pub trait Primitive {
    /// Axis-aligned bounds of the primitive.
    fn bounds(&self) -> BBox3a;

    /// Twice the centroid (`min + max` of the bounds). Kept in doubled form
    /// so binning and partitioning agree bit-for-bit without a multiply.
    #[inline]
    fn centroid2(&self) -> Vec3A {
        self.bounds().center2()
    }
}

/// Reference to one primitive: its bounds and an opaque 32-bit id.
///
/// The payload never changes during a build; only the array position does.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrimRef {
    bounds: BBox3a,
    id: u32,
}

impl PrimRef {
    /// Create a reference from bounds and an id.
    #[inline]
    pub fn new(bounds: BBox3a, id: u32) -> Self {
        Self { bounds, id }
    }

    /// Bounds of the referenced primitive.
    #[inline]
    pub fn bounds(&self) -> BBox3a {
        self.bounds
    }

    /// Opaque primitive id.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Primitive for PrimRef {
    #[inline]
    fn bounds(&self) -> BBox3a {
        self.bounds
    }
}

/// Running pair of geometric and centroid bounds.
#[derive(Clone, Copy, Debug)]
pub struct CentGeom {
    pub geom_bounds: BBox3a,
    pub cent_bounds: BBox3a,
}

impl CentGeom {
    pub const EMPTY: Self = Self {
        geom_bounds: BBox3a::EMPTY,
        cent_bounds: BBox3a::EMPTY,
    };

    /// Fold one primitive's bounds into the aggregate.
    #[inline]
    pub fn extend(&mut self, bounds: &BBox3a) {
        self.geom_bounds.expand_by_box(bounds);
        self.cent_bounds.expand_by_point(bounds.center2());
    }

    /// Fold another aggregate into this one.
    #[inline]
    pub fn merge(&mut self, other: &CentGeom) {
        self.geom_bounds.expand_by_box(&other.geom_bounds);
        self.cent_bounds.expand_by_box(&other.cent_bounds);
    }
}

impl Default for CentGeom {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Aggregate over a contiguous range of the primitive array.
///
/// `cent_bounds` is the box of doubled centroids and drives bin mapping;
/// `geom_bounds` is what gets reported upward as node bounds.
#[derive(Clone, Copy, Debug)]
pub struct PrimInfo {
    pub begin: usize,
    pub end: usize,
    pub geom_bounds: BBox3a,
    pub cent_bounds: BBox3a,
}

impl PrimInfo {
    /// Aggregate over the empty range.
    pub const EMPTY: Self = Self {
        begin: 0,
        end: 0,
        geom_bounds: BBox3a::EMPTY,
        cent_bounds: BBox3a::EMPTY,
    };

    /// Construct from a range and its accumulated bounds.
    #[inline]
    pub fn new(begin: usize, end: usize, cg: CentGeom) -> Self {
        Self {
            begin,
            end,
            geom_bounds: cg.geom_bounds,
            cent_bounds: cg.cent_bounds,
        }
    }

    /// Number of primitives in the range.
    #[inline]
    pub fn size(&self) -> usize {
        self.end - self.begin
    }

    /// Merge aggregates over adjacent ranges.
    pub fn merge(a: &PrimInfo, b: &PrimInfo) -> PrimInfo {
        let mut geom = a.geom_bounds;
        geom.expand_by_box(&b.geom_bounds);
        let mut cent = a.cent_bounds;
        cent.expand_by_box(&b.cent_bounds);
        PrimInfo {
            begin: a.begin.min(b.begin),
            end: a.end.max(b.end),
            geom_bounds: geom,
            cent_bounds: cent,
        }
    }

    /// Aggregate a whole primitive array in parallel.
    pub fn from_prims<T: Primitive + Sync>(prims: &[T]) -> PrimInfo {
        parallel_reduce(
            0..prims.len(),
            crate::parallel::DEFAULT_GRAIN,
            PrimInfo::EMPTY,
            &|r| {
                let mut cg = CentGeom::EMPTY;
                for p in &prims[r.clone()] {
                    cg.extend(&p.bounds());
                }
                PrimInfo::new(r.start, r.end, cg)
            },
            &|a, b| PrimInfo::merge(&a, &b),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(lo: f32, hi: f32) -> BBox3a {
        BBox3a::new(Vec3A::splat(lo), Vec3A::splat(hi))
    }

    #[test]
    fn test_centroid2_matches_bounds() {
        let p = PrimRef::new(boxed(1.0, 3.0), 7);
        assert_eq!(p.centroid2(), Vec3A::splat(4.0));
        assert_eq!(p.id(), 7);
    }

    #[test]
    fn test_from_prims() {
        let prims: Vec<PrimRef> = (0..2500u32)
            .map(|i| PrimRef::new(boxed(i as f32, i as f32 + 1.0), i))
            .collect();
        let pinfo = PrimInfo::from_prims(&prims);
        assert_eq!((pinfo.begin, pinfo.end), (0, 2500));
        assert_eq!(pinfo.geom_bounds.min, Vec3A::splat(0.0));
        assert_eq!(pinfo.geom_bounds.max, Vec3A::splat(2500.0));
        // Doubled centroids of the first and last boxes.
        assert_eq!(pinfo.cent_bounds.min, Vec3A::splat(1.0));
        assert_eq!(pinfo.cent_bounds.max, Vec3A::splat(4999.0));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = PrimInfo::new(0, 10, {
            let mut cg = CentGeom::EMPTY;
            cg.extend(&boxed(0.0, 1.0));
            cg
        });
        let b = PrimInfo::new(10, 30, {
            let mut cg = CentGeom::EMPTY;
            cg.extend(&boxed(-5.0, 0.5));
            cg
        });
        let ab = PrimInfo::merge(&a, &b);
        let ba = PrimInfo::merge(&b, &a);
        assert_eq!((ab.begin, ab.end), (0, 30));
        assert_eq!(ab.geom_bounds, ba.geom_bounds);
        assert_eq!(ab.cent_bounds, ba.cent_bounds);
    }
}
