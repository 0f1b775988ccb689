//! Object-median fallback split.
//!
//! Used when the binner cannot produce a valid split (all primitives share
//! a centroid, or every axis is flat) but the range is still too large for
//! a leaf. Halving by array position guarantees progress and keeps the
//! recursion depth bounded for any input.

use super::primref::{CentGeom, PrimInfo, Primitive};

/// Split `prims` (the record's sub-slice, first element at absolute index
/// `base`) at its midpoint, recomputing both aggregates in one pass.
pub fn median_split<T: Primitive>(prims: &[T], base: usize) -> (PrimInfo, PrimInfo) {
    let mid = prims.len() / 2;
    let mut left = CentGeom::EMPTY;
    for p in &prims[..mid] {
        left.extend(&p.bounds());
    }
    let mut right = CentGeom::EMPTY;
    for p in &prims[mid..] {
        right.extend(&p.bounds());
    }
    (
        PrimInfo::new(base, base + mid, left),
        PrimInfo::new(base + mid, base + prims.len(), right),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::primref::PrimRef;
    use crate::util::{BBox3a, Vec3A};

    #[test]
    fn test_median_split_halves_range() {
        let prims: Vec<PrimRef> = (0..9)
            .map(|i| {
                let c = Vec3A::splat(i as f32);
                PrimRef::new(BBox3a::new(c, c + Vec3A::ONE), i as u32)
            })
            .collect();
        let (l, r) = median_split(&prims, 100);
        assert_eq!((l.begin, l.end), (100, 104));
        assert_eq!((r.begin, r.end), (104, 109));
        assert_eq!(l.size() + r.size(), 9);
        assert_eq!(l.geom_bounds.max, Vec3A::splat(4.0));
        assert_eq!(r.geom_bounds.min, Vec3A::splat(4.0));
    }

    #[test]
    fn test_median_split_coincident_prims() {
        let b = BBox3a::new(Vec3A::ZERO, Vec3A::ONE);
        let prims: Vec<PrimRef> = (0..2).map(|i| PrimRef::new(b, i)).collect();
        let (l, r) = median_split(&prims, 0);
        assert_eq!(l.size(), 1);
        assert_eq!(r.size(), 1);
        assert_eq!(l.geom_bounds, b);
        assert_eq!(r.geom_bounds, b);
    }
}
