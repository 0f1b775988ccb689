//! Recursive top-down builder.
//!
//! The driver owns the split-or-leaf policy; the host owns node memory and
//! encoding. Each build record carries the best split the binner found for
//! its range, child slots are opened widest-cost-first up to the branching
//! factor, and records above the parallel threshold fan out onto the rayon
//! pool with a fresh arena handle per task.

use std::marker::PhantomData;
use std::ops::Range;

use smallvec::{smallvec, SmallVec};

use crate::arena::{Arena, ThreadArena};
use crate::util::{Error, Result};

use super::binning::{self, Split};
use super::fallback;
use super::primref::{PrimInfo, Primitive};

/// Build configuration.
#[derive(Clone, Copy, Debug)]
pub struct BuildSettings {
    /// Maximum children per internal node.
    pub branching_factor: usize,
    /// Depth at which ranges stop being split by SAH. The median fallback
    /// may still go a few levels deeper to honor `max_leaf_size`.
    pub max_depth: usize,
    /// Ranges at or below this size always become leaves.
    pub min_leaf_size: usize,
    /// Largest range a leaf may hold.
    pub max_leaf_size: usize,
    /// Leaf counts are rounded up to blocks of `2^log_block_size` when
    /// scoring splits, modeling packed leaf intersection.
    pub log_block_size: usize,
    /// Cost of one traversal step relative to `int_cost`.
    pub trav_cost: f32,
    /// Cost of one primitive intersection.
    pub int_cost: f32,
    /// Records larger than this are dispatched as tasks and use the
    /// parallel binning/partitioning paths; smaller records run inline.
    pub parallel_threshold: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            branching_factor: 4,
            max_depth: 48,
            min_leaf_size: 1,
            max_leaf_size: 8,
            log_block_size: 0,
            trav_cost: 1.0,
            int_cost: 1.0,
            parallel_threshold: 4096,
        }
    }
}

/// Verdict of the host's progress callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildProgress {
    Continue,
    Cancel,
}

/// One open range of the recursion: its aggregate, its depth, and the best
/// split the binner found for it.
#[derive(Clone, Copy)]
struct BuildRecord {
    pinfo: PrimInfo,
    depth: usize,
    split: Split,
}

impl BuildRecord {
    #[inline]
    fn size(&self) -> usize {
        self.pinfo.size()
    }
}

struct Builder<'c, 'a, T, R, CN, CL, P> {
    settings: &'c BuildSettings,
    arena: &'a Arena,
    create_node: &'c CN,
    create_leaf: &'c CL,
    progress: &'c P,
    _marker: PhantomData<fn() -> (T, R)>,
}

impl<'c, 'a, T, R, CN, CL, P> Builder<'c, 'a, T, R, CN, CL, P>
where
    T: Primitive + Send + Sync,
    R: Send,
    CN: Fn(&[R], &ThreadArena<'a>) -> Result<R> + Sync,
    CL: Fn(Range<usize>, &[T], &ThreadArena<'a>) -> Result<R> + Sync,
    P: Fn(usize) -> BuildProgress + Sync,
{
    /// Make a record for a range, binning it unless it is bound to become a
    /// leaf anyway.
    fn record_for(&self, pinfo: PrimInfo, depth: usize, prims: &[T]) -> BuildRecord {
        let s = self.settings;
        let split = if depth >= s.max_depth || pinfo.size() <= s.min_leaf_size {
            Split::invalid()
        } else if pinfo.size() > s.parallel_threshold {
            binning::find_parallel(prims, &pinfo, s.log_block_size)
        } else {
            binning::find(prims, &pinfo, s.log_block_size)
        };
        BuildRecord { pinfo, depth, split }
    }

    /// Split one record into two, partitioning its primitives in place.
    /// `prims` is the parent slice starting at absolute index
    /// `parent_begin`.
    fn split_record(
        &self,
        rec: &BuildRecord,
        prims: &mut [T],
        parent_begin: usize,
    ) -> (BuildRecord, BuildRecord) {
        let lo = rec.pinfo.begin - parent_begin;
        let hi = rec.pinfo.end - parent_begin;
        let sub = &mut prims[lo..hi];
        let (linfo, rinfo) = if rec.split.valid() {
            let (l, r) = if rec.size() > self.settings.parallel_threshold {
                rec.split.partition_parallel(sub, rec.pinfo.begin)
            } else {
                rec.split.partition(sub, rec.pinfo.begin)
            };
            debug_assert!(l.size() > 0 && r.size() > 0);
            if l.size() == 0 || r.size() == 0 {
                // A split the binner scored non-empty cannot partition
                // empty; halve by position so the build still terminates.
                fallback::median_split(sub, rec.pinfo.begin)
            } else {
                (l, r)
            }
        } else {
            fallback::median_split(sub, rec.pinfo.begin)
        };
        let mid = lo + linfo.size();
        (
            self.record_for(linfo, rec.depth + 1, &prims[lo..mid]),
            self.record_for(rinfo, rec.depth + 1, &prims[mid..hi]),
        )
    }

    fn recurse(&self, record: BuildRecord, prims: &mut [T], alloc: &ThreadArena<'a>) -> Result<R> {
        let s = self.settings;
        let size = record.size();
        debug_assert_eq!(prims.len(), size);

        // Terminal ranges: depth limit, small enough, or nothing to split
        // on.
        if record.depth >= s.max_depth
            || size <= s.min_leaf_size
            || (size <= s.max_leaf_size && !record.split.valid())
        {
            return self.create_large_leaf(record, prims, alloc);
        }

        // A leaf is allowed here; take it if it scores no worse than the
        // best split.
        if size <= s.max_leaf_size {
            let area = record.pinfo.geom_bounds.half_area();
            let leaf_sah = s.int_cost * area * size as f32;
            let split_sah = s.trav_cost * area + s.int_cost * record.split.sah;
            if leaf_sah <= split_sah {
                return self.create_large_leaf(record, prims, alloc);
            }
        }

        // Open up to N children, always splitting the open child with the
        // highest split cost. Oversize ranges whose binner found nothing
        // rank first; they are forced through the median fallback.
        let mut children: SmallVec<[BuildRecord; 8]> = smallvec![record];
        while children.len() < s.branching_factor {
            let mut best: Option<usize> = None;
            let mut best_key = f32::NEG_INFINITY;
            for (i, c) in children.iter().enumerate() {
                if c.size() <= s.min_leaf_size {
                    continue;
                }
                if !c.split.valid() && c.size() <= s.max_leaf_size {
                    continue;
                }
                let key = if c.split.valid() { c.split.sah } else { f32::INFINITY };
                if key > best_key {
                    best_key = key;
                    best = Some(i);
                }
            }
            let Some(i) = best else { break };
            let (l, r) = self.split_record(&children[i], prims, record.pinfo.begin);
            children[i] = l;
            children.insert(i + 1, r);
        }

        // Cancellation poll once the partitioning work for this record is
        // done; cheap enough at task granularity.
        if size > s.parallel_threshold && (self.progress)(0) == BuildProgress::Cancel {
            return Err(Error::Cancelled);
        }

        let parallel = size > s.parallel_threshold;
        let refs = self.recurse_children(&children, prims, record.pinfo.begin, parallel, alloc)?;
        (self.create_node)(&refs, alloc)
    }

    fn recurse_children(
        &self,
        children: &[BuildRecord],
        prims: &mut [T],
        base: usize,
        parallel: bool,
        alloc: &ThreadArena<'a>,
    ) -> Result<SmallVec<[R; 8]>> {
        if parallel {
            return self.recurse_children_parallel(children, prims, base);
        }
        let mut refs = SmallVec::new();
        let mut rest: &mut [T] = prims;
        let mut next_begin = base;
        for c in children {
            debug_assert_eq!(c.pinfo.begin, next_begin);
            next_begin = c.pinfo.end;
            let (sub, tail) = rest.split_at_mut(c.size());
            refs.push(self.recurse(*c, sub, alloc)?);
            rest = tail;
        }
        Ok(refs)
    }

    /// Children are contiguous and ordered; hand each task its sub-slice
    /// and join pairwise. Both sides of a join always run to completion;
    /// the first (leftmost) failure wins.
    fn recurse_children_parallel(
        &self,
        children: &[BuildRecord],
        prims: &mut [T],
        base: usize,
    ) -> Result<SmallVec<[R; 8]>> {
        if children.len() == 1 {
            let alloc = self.arena.thread_local();
            let node = self.recurse(children[0], prims, &alloc)?;
            return Ok(smallvec![node]);
        }
        let k = children.len() / 2;
        let cut = children[k].pinfo.begin - base;
        let (lp, rp) = prims.split_at_mut(cut);
        let (lr, rr) = rayon::join(
            || self.recurse_children_parallel(&children[..k], lp, base),
            || self.recurse_children_parallel(&children[k..], rp, children[k].pinfo.begin),
        );
        let mut refs = lr?;
        refs.extend(rr?);
        Ok(refs)
    }

    /// Emit a leaf, or median-split an oversize range until the pieces fit.
    fn create_large_leaf(
        &self,
        record: BuildRecord,
        prims: &mut [T],
        alloc: &ThreadArena<'a>,
    ) -> Result<R> {
        let s = self.settings;
        let size = record.size();
        if size <= s.max_leaf_size {
            let node = (self.create_leaf)(record.pinfo.begin..record.pinfo.end, prims, alloc)?;
            if (self.progress)(size) == BuildProgress::Cancel {
                return Err(Error::Cancelled);
            }
            return Ok(node);
        }

        let mut children: SmallVec<[BuildRecord; 8]> = smallvec![record];
        while children.len() < s.branching_factor {
            let mut best: Option<usize> = None;
            let mut best_size = s.max_leaf_size;
            for (i, c) in children.iter().enumerate() {
                if c.size() > best_size {
                    best_size = c.size();
                    best = Some(i);
                }
            }
            let Some(i) = best else { break };
            let c = children[i];
            let lo = c.pinfo.begin - record.pinfo.begin;
            let hi = c.pinfo.end - record.pinfo.begin;
            let (linfo, rinfo) = fallback::median_split(&prims[lo..hi], c.pinfo.begin);
            children[i] = BuildRecord {
                pinfo: linfo,
                depth: c.depth + 1,
                split: Split::invalid(),
            };
            children.insert(
                i + 1,
                BuildRecord {
                    pinfo: rinfo,
                    depth: c.depth + 1,
                    split: Split::invalid(),
                },
            );
        }

        let mut refs: SmallVec<[R; 8]> = SmallVec::new();
        let mut rest: &mut [T] = prims;
        for c in &children {
            let (sub, tail) = rest.split_at_mut(c.size());
            refs.push(self.create_large_leaf(*c, sub, alloc)?);
            rest = tail;
        }
        (self.create_node)(&refs, alloc)
    }
}

/// Build a BVH over `prims`, returning the host-encoded root reference.
///
/// `pinfo` must aggregate the whole slice. The slice is permuted in place;
/// afterwards every leaf range handed to `create_leaf` refers to final
/// positions. An empty slice produces a single `create_leaf(0..0, ..)`
/// call, letting the host encode its empty-tree sentinel.
///
/// `create_node` receives children ordered by primitive range.
/// `progress` receives the number of primitives newly settled into leaves
/// and may cancel the build; in-flight tasks finish before
/// [`Error::Cancelled`] is returned, and no root is published.
#[tracing::instrument(skip_all, fields(prim_count = prims.len()))]
pub fn build<'a, T, R, CN, CL, P>(
    prims: &mut [T],
    pinfo: PrimInfo,
    settings: &BuildSettings,
    arena: &'a Arena,
    create_node: CN,
    create_leaf: CL,
    progress: P,
) -> Result<R>
where
    T: Primitive + Send + Sync,
    R: Send,
    CN: Fn(&[R], &ThreadArena<'a>) -> Result<R> + Sync,
    CL: Fn(Range<usize>, &[T], &ThreadArena<'a>) -> Result<R> + Sync,
    P: Fn(usize) -> BuildProgress + Sync,
{
    assert!(settings.branching_factor >= 2);
    assert!(settings.min_leaf_size >= 1);
    assert!(settings.max_leaf_size >= settings.min_leaf_size);
    assert!(settings.log_block_size < 16);

    let builder = Builder {
        settings,
        arena,
        create_node: &create_node,
        create_leaf: &create_leaf,
        progress: &progress,
        _marker: PhantomData,
    };

    let alloc = arena.thread_local();
    if prims.is_empty() {
        return (builder.create_leaf)(0..0, prims, &alloc);
    }
    debug_assert_eq!(pinfo.begin, 0);
    debug_assert_eq!(pinfo.size(), prims.len());

    let record = builder.record_for(pinfo, 0, prims);
    let root = builder.recurse(record, prims, &alloc)?;
    tracing::debug!(reserved = arena.reserved_bytes(), "bvh build complete");
    Ok(root)
}
