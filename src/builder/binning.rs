//! Binned SAH split search and range partitioning.
//!
//! Centroids are quantized into up to 32 bins per axis; per-bin counts and
//! bounds are accumulated for all three axes at once, then two sweeps score
//! every candidate boundary with the surface-area heuristic. The winning
//! split carries its [`Mapping`] so partitioning classifies primitives with
//! exactly the same bin function the search used.

use crate::parallel::{in_place_partition, parallel_in_place_partition, parallel_reduce, DEFAULT_GRAIN};
use crate::util::{BBox3a, IVec3, UVec3, Vec3A};

use super::primref::{CentGeom, PrimInfo, Primitive};

/// Upper limit on bins per axis.
pub const MAX_BINS: usize = 32;

/// Extents below this are treated as flat and excluded from the search.
const MIN_EXTENT: f32 = 1e-19;

/// Linear function mapping a doubled centroid to a bin index per axis.
#[derive(Clone, Copy, Debug)]
pub struct Mapping {
    num: usize,
    ofs: Vec3A,
    scale: Vec3A,
}

impl Mapping {
    /// Derive the mapping for a range aggregate. The bin count scales with
    /// the range size, capped at [`MAX_BINS`]; flat axes get scale 0 and
    /// are reported invalid.
    pub fn new(pinfo: &PrimInfo) -> Self {
        let num = ((4.0 + 0.05 * pinfo.size() as f32) as usize).clamp(1, MAX_BINS);
        let diag = pinfo.cent_bounds.size();
        let scale = Vec3A::select(
            diag.cmpgt(Vec3A::splat(MIN_EXTENT)),
            Vec3A::splat(0.99 * num as f32) / diag,
            Vec3A::ZERO,
        );
        Self {
            num,
            ofs: pinfo.cent_bounds.min,
            scale,
        }
    }

    /// Mapping that is invalid on every axis.
    fn degenerate() -> Self {
        Self {
            num: 1,
            ofs: Vec3A::ZERO,
            scale: Vec3A::ZERO,
        }
    }

    /// Number of bins per axis.
    #[inline]
    pub fn size(&self) -> usize {
        self.num
    }

    /// Bin a doubled centroid, asserting the invariant that points inside
    /// the centroid bounds land in `[0, num)` on every axis.
    #[inline]
    pub fn bin(&self, p: Vec3A) -> IVec3 {
        let i = self.bin_unclamped(p);
        debug_assert!(i.x >= 0 && (i.x as usize) < self.num);
        debug_assert!(i.y >= 0 && (i.y as usize) < self.num);
        debug_assert!(i.z >= 0 && (i.z as usize) < self.num);
        i
    }

    /// Bin a doubled centroid without the range check. Truncates toward
    /// negative infinity.
    #[inline]
    pub fn bin_unclamped(&self, p: Vec3A) -> IVec3 {
        ((p - self.ofs) * self.scale).floor().as_ivec3()
    }

    /// True if the axis is flat and must be ignored by the split search.
    #[inline]
    pub fn is_invalid(&self, dim: usize) -> bool {
        self.scale.to_array()[dim] == 0.0
    }
}

/// Result of the split search.
///
/// `dim == -1` means no valid split exists (all axes flat, or every
/// primitive in one bin). `pos` is a bin boundary in `[1, num)`.
#[derive(Clone, Copy, Debug)]
pub struct Split {
    pub sah: f32,
    pub dim: i32,
    pub pos: usize,
    pub mapping: Mapping,
}

impl Split {
    /// A split that is not usable.
    pub fn invalid() -> Self {
        Self {
            sah: f32::INFINITY,
            dim: -1,
            pos: 0,
            mapping: Mapping::degenerate(),
        }
    }

    /// Whether the search found a usable split.
    #[inline]
    pub fn valid(&self) -> bool {
        self.dim >= 0
    }

    /// Side predicate: left iff the primitive's bin along the split axis is
    /// below `pos`.
    #[inline]
    fn goes_left<T: Primitive>(&self, p: &T) -> bool {
        let bin = self.mapping.bin_unclamped(p.centroid2()).to_array();
        bin[self.dim as usize] < self.pos as i32
    }

    /// Partition `prims` around this split. `prims` is the record's
    /// sub-slice; `base` is the absolute index of its first element, used
    /// to place the returned aggregates.
    pub fn partition<T: Primitive>(&self, prims: &mut [T], base: usize) -> (PrimInfo, PrimInfo) {
        debug_assert!(self.valid());
        let len = prims.len();
        let (mid, left, right) = in_place_partition(
            prims,
            CentGeom::EMPTY,
            &|p: &T| self.goes_left(p),
            &|cg: &mut CentGeom, p: &T| cg.extend(&p.bounds()),
        );
        (
            PrimInfo::new(base, base + mid, left),
            PrimInfo::new(base + mid, base + len, right),
        )
    }

    /// Parallel counterpart of [`Split::partition`]. The derived split
    /// index (not the binner's predicted count) defines the children.
    pub fn partition_parallel<T: Primitive + Send + Sync>(
        &self,
        prims: &mut [T],
        base: usize,
    ) -> (PrimInfo, PrimInfo) {
        debug_assert!(self.valid());
        let len = prims.len();
        let (mid, left, right) = parallel_in_place_partition(
            prims,
            CentGeom::EMPTY,
            |p: &T| self.goes_left(p),
            |cg: &mut CentGeom, p: &T| cg.extend(&p.bounds()),
            |a: &mut CentGeom, b: &CentGeom| a.merge(b),
        );
        (
            PrimInfo::new(base, base + mid, left),
            PrimInfo::new(base + mid, base + len, right),
        )
    }
}

/// Side counts and bounds of a chosen split, read straight off the bins.
#[derive(Clone, Copy, Debug)]
pub struct SplitInfo {
    pub left_count: usize,
    pub right_count: usize,
    pub left_bounds: BBox3a,
    pub right_bounds: BBox3a,
}

/// Per-bin accumulator for all three axes.
///
/// The zeroed state (empty boxes, zero counts) is the merge identity, so
/// per-worker accumulators can be tree-reduced in any grouping.
pub struct BinInfo {
    bounds: [[BBox3a; 3]; MAX_BINS],
    counts: [UVec3; MAX_BINS],
}

impl BinInfo {
    pub fn new() -> Self {
        Self {
            bounds: [[BBox3a::EMPTY; 3]; MAX_BINS],
            counts: [UVec3::ZERO; MAX_BINS],
        }
    }

    /// Accumulate a run of primitives.
    pub fn add<T: Primitive>(&mut self, prims: &[T], mapping: &Mapping) {
        for p in prims {
            let bounds = p.bounds();
            let bin = mapping.bin(p.centroid2());
            let (bx, by, bz) = (bin.x as usize, bin.y as usize, bin.z as usize);
            self.counts[bx].x += 1;
            self.bounds[bx][0].expand_by_box(&bounds);
            self.counts[by].y += 1;
            self.bounds[by][1].expand_by_box(&bounds);
            self.counts[bz].z += 1;
            self.bounds[bz][2].expand_by_box(&bounds);
        }
    }

    /// Merge another accumulator into this one.
    pub fn merge(&mut self, other: &BinInfo) {
        for i in 0..MAX_BINS {
            self.counts[i] += other.counts[i];
            for a in 0..3 {
                self.bounds[i][a].expand_by_box(&other.bounds[i][a]);
            }
        }
    }

    /// Scan the bins for the SAH-optimal boundary.
    ///
    /// Counts are rounded up to blocks of `2^log_block_size` to model
    /// leaf packing. Candidates leaving either side empty are skipped;
    /// ties go to the lower axis, then the lower position.
    pub fn best(&self, mapping: &Mapping, log_block_size: usize) -> Split {
        let num = mapping.size();

        // Sweep right to left: suffix counts and areas per axis.
        let mut r_areas = [Vec3A::ZERO; MAX_BINS];
        let mut r_counts = [UVec3::ZERO; MAX_BINS];
        let mut count = UVec3::ZERO;
        let mut bx = BBox3a::EMPTY;
        let mut by = BBox3a::EMPTY;
        let mut bz = BBox3a::EMPTY;
        for i in (1..num).rev() {
            count += self.counts[i];
            r_counts[i] = count;
            bx.expand_by_box(&self.bounds[i][0]);
            by.expand_by_box(&self.bounds[i][1]);
            bz.expand_by_box(&self.bounds[i][2]);
            r_areas[i] = Vec3A::new(bx.half_area(), by.half_area(), bz.half_area());
        }

        // Sweep left to right, scoring each boundary on all axes at once.
        let shift = log_block_size as u32;
        let blocks_add = (1u32 << shift) - 1;
        let mut best_sah = [f32::INFINITY; 3];
        let mut best_pos = [0usize; 3];
        count = UVec3::ZERO;
        bx = BBox3a::EMPTY;
        by = BBox3a::EMPTY;
        bz = BBox3a::EMPTY;
        for i in 1..num {
            count += self.counts[i - 1];
            bx.expand_by_box(&self.bounds[i - 1][0]);
            by.expand_by_box(&self.bounds[i - 1][1]);
            bz.expand_by_box(&self.bounds[i - 1][2]);
            let l_area = Vec3A::new(bx.half_area(), by.half_area(), bz.half_area());
            let l_blocks = Vec3A::new(
                ((count.x + blocks_add) >> shift) as f32,
                ((count.y + blocks_add) >> shift) as f32,
                ((count.z + blocks_add) >> shift) as f32,
            );
            let rc = r_counts[i];
            let r_blocks = Vec3A::new(
                ((rc.x + blocks_add) >> shift) as f32,
                ((rc.y + blocks_add) >> shift) as f32,
                ((rc.z + blocks_add) >> shift) as f32,
            );
            let sah = (l_area * l_blocks + r_areas[i] * r_blocks).to_array();
            let l_raw = count.to_array();
            let r_raw = rc.to_array();
            for a in 0..3 {
                if l_raw[a] == 0 || r_raw[a] == 0 {
                    continue;
                }
                if sah[a] < best_sah[a] {
                    best_sah[a] = sah[a];
                    best_pos[a] = i;
                }
            }
        }

        // Pick the best axis; strict < keeps the lower axis on ties.
        let mut best = Split::invalid();
        for dim in 0..3 {
            if mapping.is_invalid(dim) {
                continue;
            }
            if best_sah[dim] < best.sah && best_pos[dim] != 0 {
                best = Split {
                    sah: best_sah[dim],
                    dim: dim as i32,
                    pos: best_pos[dim],
                    mapping: *mapping,
                };
            }
        }
        best
    }

    /// Side counts and bounds implied by a split, without touching the
    /// primitive array.
    pub fn split_info(&self, mapping: &Mapping, split: &Split) -> SplitInfo {
        if !split.valid() {
            return SplitInfo {
                left_count: 0,
                right_count: 0,
                left_bounds: BBox3a::EMPTY,
                right_bounds: BBox3a::EMPTY,
            };
        }
        let dim = split.dim as usize;
        let mut left_count = 0usize;
        let mut left_bounds = BBox3a::EMPTY;
        for i in 0..split.pos {
            left_count += self.counts[i].to_array()[dim] as usize;
            left_bounds.expand_by_box(&self.bounds[i][dim]);
        }
        let mut right_count = 0usize;
        let mut right_bounds = BBox3a::EMPTY;
        for i in split.pos..mapping.size() {
            right_count += self.counts[i].to_array()[dim] as usize;
            right_bounds.expand_by_box(&self.bounds[i][dim]);
        }
        SplitInfo {
            left_count,
            right_count,
            left_bounds,
            right_bounds,
        }
    }
}

impl Default for BinInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the best split for a range.
pub fn find<T: Primitive>(prims: &[T], pinfo: &PrimInfo, log_block_size: usize) -> Split {
    let mapping = Mapping::new(pinfo);
    let mut binner = BinInfo::new();
    binner.add(prims, &mapping);
    binner.best(&mapping, log_block_size)
}

/// Find the best split for a range, binning sub-ranges in parallel and
/// tree-reducing the accumulators.
pub fn find_parallel<T: Primitive + Sync>(
    prims: &[T],
    pinfo: &PrimInfo,
    log_block_size: usize,
) -> Split {
    let mapping = Mapping::new(pinfo);
    let binner = parallel_reduce(
        0..prims.len(),
        DEFAULT_GRAIN,
        BinInfo::new(),
        &|r| {
            let mut b = BinInfo::new();
            b.add(&prims[r], &mapping);
            b
        },
        &|mut a, b| {
            a.merge(&b);
            a
        },
    );
    binner.best(&mapping, log_block_size)
}

/// Like [`find`], but also returns the side counts and bounds of the
/// winning split for callers that compare costs before partitioning.
pub fn find_with_info<T: Primitive>(
    prims: &[T],
    pinfo: &PrimInfo,
    log_block_size: usize,
) -> (Split, SplitInfo) {
    let mapping = Mapping::new(pinfo);
    let mut binner = BinInfo::new();
    binner.add(prims, &mapping);
    let split = binner.best(&mapping, log_block_size);
    let info = binner.split_info(&mapping, &split);
    (split, info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::primref::PrimRef;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn unit_box_at(x: f32, y: f32, z: f32) -> PrimRef {
        let c = Vec3A::new(x, y, z);
        PrimRef::new(BBox3a::new(c - Vec3A::splat(0.5), c + Vec3A::splat(0.5)), 0)
    }

    fn random_prims(n: usize, seed: u64) -> Vec<PrimRef> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let c = Vec3A::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>());
                let h = Vec3A::splat(rng.gen_range(0.001..0.05f32));
                PrimRef::new(BBox3a::new(c - h, c + h), i as u32)
            })
            .collect()
    }

    #[test]
    fn test_mapping_bins_stay_in_range() {
        let prims = random_prims(10_000, 11);
        let pinfo = PrimInfo::from_prims(&prims);
        let mapping = Mapping::new(&pinfo);
        let num = mapping.size() as i32;
        for p in &prims {
            let b = mapping.bin(p.centroid2()).to_array();
            for a in 0..3 {
                assert!(b[a] >= 0 && b[a] < num);
            }
        }
    }

    #[test]
    fn test_mapping_flat_axis_invalid() {
        let prims: Vec<PrimRef> = (0..100).map(|i| unit_box_at(i as f32, 0.0, 0.0)).collect();
        let pinfo = PrimInfo::from_prims(&prims);
        let mapping = Mapping::new(&pinfo);
        assert!(!mapping.is_invalid(0));
        assert!(mapping.is_invalid(1));
        assert!(mapping.is_invalid(2));
    }

    #[test]
    fn test_binner_merge_matches_whole_range() {
        let prims = random_prims(4096, 5);
        let pinfo = PrimInfo::from_prims(&prims);
        let mapping = Mapping::new(&pinfo);

        let mut whole = BinInfo::new();
        whole.add(&prims, &mapping);

        let (a, b) = prims.split_at(1234);
        let mut merged = BinInfo::new();
        merged.add(a, &mapping);
        let mut other = BinInfo::new();
        other.add(b, &mapping);
        merged.merge(&other);

        for i in 0..MAX_BINS {
            assert_eq!(whole.counts[i], merged.counts[i]);
            for axis in 0..3 {
                assert_eq!(whole.bounds[i][axis], merged.bounds[i][axis]);
            }
        }
        // And the reduced accumulator picks the same split.
        let s0 = whole.best(&mapping, 0);
        let s1 = merged.best(&mapping, 0);
        assert_eq!((s0.dim, s0.pos), (s1.dim, s1.pos));
        assert_eq!(s0.sah, s1.sah);
    }

    #[test]
    fn test_parallel_find_matches_serial() {
        let prims = random_prims(50_000, 6);
        let pinfo = PrimInfo::from_prims(&prims);
        let s = find(&prims, &pinfo, 2);
        let p = find_parallel(&prims, &pinfo, 2);
        assert_eq!((s.dim, s.pos), (p.dim, p.pos));
        assert_eq!(s.sah, p.sah);
    }

    #[test]
    fn test_linear_arrangement_splits_on_x() {
        let prims: Vec<PrimRef> = (0..128).map(|i| unit_box_at(i as f32, 0.0, 0.0)).collect();
        let pinfo = PrimInfo::from_prims(&prims);
        let split = find(&prims, &pinfo, 0);
        assert!(split.valid());
        assert_eq!(split.dim, 0);
        assert!(split.pos >= 1 && split.pos < split.mapping.size());
    }

    #[test]
    fn test_identical_centroids_yield_no_split() {
        // Same centroid, different extents: every axis is flat.
        let prims: Vec<PrimRef> = (0..32)
            .map(|i| {
                let h = Vec3A::splat(1.0 + i as f32);
                PrimRef::new(BBox3a::new(-h, h), i as u32)
            })
            .collect();
        let pinfo = PrimInfo::from_prims(&prims);
        let split = find(&prims, &pinfo, 0);
        assert!(!split.valid());
    }

    #[test]
    fn test_partition_matches_split_info() {
        let mut prims = random_prims(8192, 7);
        let pinfo = PrimInfo::from_prims(&prims);
        let (split, info) = find_with_info(&prims, &pinfo, 0);
        assert!(split.valid());
        assert_eq!(info.left_count + info.right_count, prims.len());

        let (l, r) = split.partition(&mut prims, 0);
        // The partition-derived counts must agree with the binner's
        // prediction: both evaluate the same pure predicate.
        assert_eq!(l.size(), info.left_count);
        assert_eq!(r.size(), info.right_count);
        assert_eq!(l.begin, 0);
        assert_eq!(l.end, r.begin);
        assert_eq!(r.end, prims.len());

        let dim = split.dim as usize;
        for p in &prims[..l.size()] {
            let bin = split.mapping.bin_unclamped(p.centroid2()).to_array();
            assert!(bin[dim] < split.pos as i32);
        }
        for p in &prims[l.size()..] {
            let bin = split.mapping.bin_unclamped(p.centroid2()).to_array();
            assert!(bin[dim] >= split.pos as i32);
        }
    }

    #[test]
    fn test_parallel_partition_matches_serial_aggregates() {
        let prims = random_prims(60_000, 8);
        let pinfo = PrimInfo::from_prims(&prims);
        let split = find(&prims, &pinfo, 0);
        assert!(split.valid());

        let mut serial = prims.clone();
        let (sl, sr) = split.partition(&mut serial, 0);
        let mut parallel = prims;
        let (pl, pr) = split.partition_parallel(&mut parallel, 0);

        assert_eq!((sl.begin, sl.end), (pl.begin, pl.end));
        assert_eq!((sr.begin, sr.end), (pr.begin, pr.end));
        assert_eq!(sl.geom_bounds, pl.geom_bounds);
        assert_eq!(sl.cent_bounds, pl.cent_bounds);
        assert_eq!(sr.geom_bounds, pr.geom_bounds);
        assert_eq!(sr.cent_bounds, pr.cent_bounds);
    }
}
