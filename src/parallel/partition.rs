//! In-place partition, serial and parallel.
//!
//! The parallel variant claims fixed-size blocks from both ends of the
//! slice through a single packed atomic cursor pair and neutralizes pairs
//! of blocks against each other. Each element is classified exactly once,
//! so the side aggregates and the returned split index are deterministic;
//! the physical order *within* each side depends on scheduling.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use super::parallel_reduce;

/// Elements per claimed block.
const BLOCK_SIZE: usize = 128;

/// Below this many elements the parallel entry point runs the serial loop.
const PARALLEL_CUTOFF: usize = 4 * BLOCK_SIZE;

/// Serial two-pointer partition.
///
/// Reorders `slice` so every element satisfying `pred` precedes every
/// element that does not, feeding each element through `add` exactly once
/// into the aggregate for the side it ends up on. Returns the split index
/// and the two aggregates.
pub fn in_place_partition<T, V, P, A>(slice: &mut [T], init: V, pred: &P, add: &A) -> (usize, V, V)
where
    V: Clone,
    P: Fn(&T) -> bool,
    A: Fn(&mut V, &T),
{
    let mut left = init.clone();
    let mut right = init;
    let mut l = 0;
    let mut r = slice.len();
    loop {
        while l < r && pred(&slice[l]) {
            add(&mut left, &slice[l]);
            l += 1;
        }
        while l < r && !pred(&slice[r - 1]) {
            add(&mut right, &slice[r - 1]);
            r -= 1;
        }
        if l >= r {
            break;
        }
        // slice[l] belongs right, slice[r - 1] belongs left.
        add(&mut right, &slice[l]);
        add(&mut left, &slice[r - 1]);
        slice.swap(l, r - 1);
        l += 1;
        r -= 1;
    }
    (l, left, right)
}

/// Packed pair of block cursors. Low 32 bits: next unclaimed block on the
/// left; high 32 bits: one past the last unclaimed block on the right.
/// Invariant: left <= right; the pair meets exactly once and never crosses.
struct BlockClaims(AtomicU64);

impl BlockClaims {
    fn new(num_blocks: usize) -> Self {
        Self(AtomicU64::new((num_blocks as u64) << 32))
    }

    fn claim_left(&self) -> Option<usize> {
        let mut cur = self.0.load(Ordering::SeqCst);
        loop {
            let (l, r) = (cur & 0xffff_ffff, cur >> 32);
            if l >= r {
                return None;
            }
            match self
                .0
                .compare_exchange_weak(cur, cur + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Some(l as usize),
                Err(now) => cur = now,
            }
        }
    }

    fn claim_right(&self) -> Option<usize> {
        let mut cur = self.0.load(Ordering::SeqCst);
        loop {
            let (l, r) = (cur & 0xffff_ffff, cur >> 32);
            if l >= r {
                return None;
            }
            match self.0.compare_exchange_weak(
                cur,
                cur - (1u64 << 32),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some((r - 1) as usize),
                Err(now) => cur = now,
            }
        }
    }

    /// Block index where the two cursors met.
    fn boundary(&self) -> usize {
        let cur = self.0.load(Ordering::SeqCst);
        debug_assert_eq!(cur & 0xffff_ffff, cur >> 32);
        (cur & 0xffff_ffff) as usize
    }
}

/// Shared mutable view used by partition workers. Blocks claimed through
/// [`BlockClaims`] are disjoint, which is what makes the concurrent access
/// sound.
struct RawSlice<T> {
    ptr: *mut T,
}

impl<T> Clone for RawSlice<T> {
    fn clone(&self) -> Self {
        Self { ptr: self.ptr }
    }
}
impl<T> Copy for RawSlice<T> {}

unsafe impl<T: Send> Send for RawSlice<T> {}
unsafe impl<T: Send> Sync for RawSlice<T> {}

impl<T> RawSlice<T> {
    /// Safety: `i` must lie in a block the caller has claimed.
    #[inline]
    unsafe fn get(&self, i: usize) -> &T {
        &*self.ptr.add(i)
    }

    /// Safety: `i` and `j` must lie in blocks the caller has claimed.
    #[inline]
    unsafe fn swap(&self, i: usize, j: usize) {
        std::ptr::swap(self.ptr.add(i), self.ptr.add(j));
    }
}

struct WorkerOut<V> {
    /// Unclassified tail of the worker's final left block.
    left_rest: Option<Range<usize>>,
    /// Unclassified head of the worker's final right block.
    right_rest: Option<Range<usize>>,
    left: V,
    right: V,
    left_count: usize,
}

fn partition_worker<T, V, P, A>(
    slice: RawSlice<T>,
    claims: &BlockClaims,
    init: V,
    pred: &P,
    add: &A,
) -> WorkerOut<V>
where
    V: Clone,
    P: Fn(&T) -> bool,
    A: Fn(&mut V, &T),
{
    let mut left = init.clone();
    let mut right = init;
    let mut left_count = 0usize;
    // (begin, cursor, end): for a left block [begin, cursor) is classified
    // left; for a right block [cursor, end) is classified right.
    let mut lb: Option<(usize, usize, usize)> = None;
    let mut rb: Option<(usize, usize, usize)> = None;

    'claim: loop {
        let (lbeg, mut lcur, lend) = match lb.take() {
            Some(b) => b,
            None => match claims.claim_left() {
                Some(i) => {
                    let s = i * BLOCK_SIZE;
                    (s, s, s + BLOCK_SIZE)
                }
                None => break 'claim,
            },
        };
        let (rbeg, mut rcur, rend) = match rb.take() {
            Some(b) => b,
            None => match claims.claim_right() {
                Some(i) => {
                    let s = i * BLOCK_SIZE;
                    (s, s + BLOCK_SIZE, s + BLOCK_SIZE)
                }
                None => {
                    lb = Some((lbeg, lcur, lend));
                    break 'claim;
                }
            },
        };

        // Neutralize the pair: consume matching elements from both ends,
        // swap mismatched pairs across the boundary.
        loop {
            while lcur < lend {
                // Safety: lcur lies in this worker's left block.
                let p = unsafe { slice.get(lcur) };
                if !pred(p) {
                    break;
                }
                add(&mut left, p);
                left_count += 1;
                lcur += 1;
            }
            while rbeg < rcur {
                // Safety: rcur - 1 lies in this worker's right block.
                let p = unsafe { slice.get(rcur - 1) };
                if pred(p) {
                    break;
                }
                add(&mut right, p);
                rcur -= 1;
            }
            if lcur == lend || rcur == rbeg {
                break;
            }
            // Safety: both indices lie in this worker's blocks.
            unsafe {
                add(&mut right, slice.get(lcur));
                add(&mut left, slice.get(rcur - 1));
                left_count += 1;
                slice.swap(lcur, rcur - 1);
            }
            lcur += 1;
            rcur -= 1;
        }
        if lcur < lend {
            lb = Some((lbeg, lcur, lend));
        }
        if rcur > rbeg {
            rb = Some((rbeg, rcur, rend));
        }
    }

    WorkerOut {
        left_rest: lb.map(|(_, cur, end)| cur..end),
        right_rest: rb.map(|(beg, cur, _)| beg..cur),
        left,
        right,
        left_count,
    }
}

/// Parallel in-place partition with the contract of
/// [`in_place_partition`].
///
/// Workers claim 128-element blocks from both ends of the slice via one
/// atomic cursor pair and neutralize them pairwise; the calling worker then
/// classifies the leftover partial blocks and swaps the bounded set of
/// misplaced elements around the final split index. `merge` folds worker
/// aggregates and must be associative.
pub fn parallel_in_place_partition<T, V, P, A, M>(
    slice: &mut [T],
    init: V,
    pred: P,
    add: A,
    merge: M,
) -> (usize, V, V)
where
    T: Send,
    V: Clone + Send + Sync,
    P: Fn(&T) -> bool + Sync,
    A: Fn(&mut V, &T) + Sync,
    M: Fn(&mut V, &V) + Sync,
{
    let len = slice.len();
    let num_blocks = len / BLOCK_SIZE;
    let num_workers = rayon::current_num_threads().min(num_blocks / 2);
    if len < PARALLEL_CUTOFF || num_workers < 2 {
        return in_place_partition(slice, init, &pred, &add);
    }

    let claims = BlockClaims::new(num_blocks);
    let raw = RawSlice {
        ptr: slice.as_mut_ptr(),
    };
    let outs: Vec<WorkerOut<V>> = parallel_reduce(
        0..num_workers,
        1,
        Vec::new(),
        &|r| {
            r.map(|_| partition_worker(raw, &claims, init.clone(), &pred, &add))
                .collect::<Vec<_>>()
        },
        &|mut a, mut b| {
            a.append(&mut b);
            a
        },
    );

    // Fold worker aggregates and collect the unclassified leftovers.
    let mut left = init.clone();
    let mut right = init;
    let mut left_count = 0usize;
    let mut rest: Vec<Range<usize>> = Vec::new();
    for out in &outs {
        merge(&mut left, &out.left);
        merge(&mut right, &out.right);
        left_count += out.left_count;
        if let Some(r) = out.left_rest.clone() {
            rest.push(r);
        }
        if let Some(r) = out.right_rest.clone() {
            rest.push(r);
        }
    }
    if num_blocks * BLOCK_SIZE < len {
        rest.push(num_blocks * BLOCK_SIZE..len);
    }

    // Classify everything the workers did not reach. After this the
    // aggregates are complete and the split index is fixed.
    for r in &rest {
        for i in r.clone() {
            let p = &slice[i];
            if pred(p) {
                add(&mut left, p);
                left_count += 1;
            } else {
                add(&mut right, p);
            }
        }
    }
    let mid = left_count;

    // Any misplaced element is either in a leftover range or in the window
    // between the block-claim boundary and the split index: fully
    // neutralized left blocks hold only left-bound elements and lie below
    // the boundary (right blocks symmetrically above).
    let boundary = claims.boundary() * BLOCK_SIZE;
    rest.push(boundary.min(mid)..boundary.max(mid));
    rest.sort_by_key(|r| r.start);
    let mut candidates: Vec<Range<usize>> = Vec::new();
    for r in rest {
        if r.is_empty() {
            continue;
        }
        match candidates.last_mut() {
            Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
            _ => candidates.push(r),
        }
    }

    let mut misplaced_left: Vec<usize> = Vec::new(); // left-bound at >= mid
    let mut misplaced_right: Vec<usize> = Vec::new(); // right-bound at < mid
    for r in &candidates {
        for i in r.clone() {
            let goes_left = pred(&slice[i]);
            if i < mid && !goes_left {
                misplaced_right.push(i);
            } else if i >= mid && goes_left {
                misplaced_left.push(i);
            }
        }
    }
    debug_assert_eq!(misplaced_left.len(), misplaced_right.len());
    for (&a, &b) in misplaced_right.iter().zip(misplaced_left.iter()) {
        slice.swap(a, b);
    }

    (mid, left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn check_partition(mut data: Vec<u32>, threshold: u32, parallel: bool) {
        let mut sorted_before = data.clone();
        sorted_before.sort_unstable();
        let expected_mid = data.iter().filter(|&&x| x < threshold).count();

        let pred = |x: &u32| *x < threshold;
        let add = |acc: &mut (usize, u64), x: &u32| {
            acc.0 += 1;
            acc.1 += u64::from(*x);
        };
        let (mid, l, r) = if parallel {
            parallel_in_place_partition(&mut data, (0usize, 0u64), pred, add, |a: &mut (usize, u64), b: &(usize, u64)| {
                a.0 += b.0;
                a.1 += b.1;
            })
        } else {
            in_place_partition(&mut data, (0usize, 0u64), &pred, &add)
        };

        assert_eq!(mid, expected_mid);
        assert!(data[..mid].iter().all(|&x| x < threshold));
        assert!(data[mid..].iter().all(|&x| x >= threshold));
        assert_eq!(l.0, mid);
        assert_eq!(r.0, data.len() - mid);
        assert_eq!(l.1, data[..mid].iter().map(|&x| u64::from(x)).sum::<u64>());
        assert_eq!(r.1, data[mid..].iter().map(|&x| u64::from(x)).sum::<u64>());

        let mut sorted_after = data;
        sorted_after.sort_unstable();
        assert_eq!(sorted_before, sorted_after);
    }

    fn random_data(n: usize, seed: u64) -> Vec<u32> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(0..10_000)).collect()
    }

    #[test]
    fn test_serial_basic() {
        check_partition(random_data(1000, 1), 5000, false);
        check_partition(vec![], 1, false);
        check_partition(vec![3], 5, false);
        check_partition(vec![7], 5, false);
    }

    #[test]
    fn test_serial_one_sided() {
        check_partition(vec![1; 500], 10, false);
        check_partition(vec![99; 500], 10, false);
    }

    #[test]
    fn test_parallel_matches_serial_contract() {
        for seed in 0..4 {
            check_partition(random_data(100_000, seed), 5000, true);
        }
    }

    #[test]
    fn test_parallel_skewed() {
        // Split index far away from the block-claim boundary.
        check_partition(random_data(50_000, 9), 500, true);
        check_partition(random_data(50_000, 10), 9_500, true);
        check_partition(vec![0; 40_000], 1, true);
        check_partition(vec![1; 40_000], 1, true);
    }

    #[test]
    fn test_parallel_small_falls_back() {
        check_partition(random_data(100, 3), 5000, true);
        check_partition(random_data(BLOCK_SIZE - 1, 4), 5000, true);
    }

    #[test]
    fn test_parallel_unaligned_tail() {
        check_partition(random_data(100_000 + 37, 5), 5000, true);
    }
}
