//! Fork-join primitives used by the builder.
//!
//! Thin layer over rayon's work-stealing pool. All entry points are
//! synchronous: they return only after every subtask has completed.
//! `parallel_reduce` makes no promise about execution order, but with an
//! associative reduction operator the reduced *value* is deterministic
//! because the split points depend only on the range and grain size.

mod partition;

pub use partition::{in_place_partition, parallel_in_place_partition};

use std::ops::Range;

/// Ranges at or below this many elements run inline.
pub const DEFAULT_GRAIN: usize = 1024;

/// Reduce `map` over `range`, splitting recursively until sub-ranges are
/// at most `grain` elements.
///
/// `identity` is returned for an empty range; `reduce` must be
/// associative for the result to be independent of scheduling.
pub fn parallel_reduce<T, M, R>(range: Range<usize>, grain: usize, identity: T, map: &M, reduce: &R) -> T
where
    T: Send,
    M: Fn(Range<usize>) -> T + Sync,
    R: Fn(T, T) -> T + Sync,
{
    if range.is_empty() {
        return identity;
    }
    let grain = grain.max(1);

    fn go<T, M, R>(range: Range<usize>, grain: usize, map: &M, reduce: &R) -> T
    where
        T: Send,
        M: Fn(Range<usize>) -> T + Sync,
        R: Fn(T, T) -> T + Sync,
    {
        if range.len() <= grain {
            return map(range);
        }
        let mid = range.start + range.len() / 2;
        let (a, b) = rayon::join(
            || go(range.start..mid, grain, map, reduce),
            || go(mid..range.end, grain, map, reduce),
        );
        reduce(a, b)
    }

    go(range, grain, map, reduce)
}

/// Run `body` over `range` in parallel, splitting recursively until
/// sub-ranges are at most `grain` elements.
pub fn parallel_for<F>(range: Range<usize>, grain: usize, body: &F)
where
    F: Fn(Range<usize>) + Sync,
{
    if range.is_empty() {
        return;
    }
    let grain = grain.max(1);
    if range.len() <= grain {
        body(range);
        return;
    }
    let mid = range.start + range.len() / 2;
    rayon::join(
        || parallel_for(range.start..mid, grain, body),
        || parallel_for(mid..range.end, grain, body),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_reduce_matches_serial() {
        let data: Vec<u64> = (0..10_000).map(|i| i * 7 + 3).collect();
        let expected: u64 = data.iter().sum();
        let got = parallel_reduce(
            0..data.len(),
            64,
            0u64,
            &|r| data[r].iter().sum::<u64>(),
            &|a, b| a + b,
        );
        assert_eq!(got, expected);
    }

    #[test]
    fn test_reduce_empty_range_yields_identity() {
        let got = parallel_reduce(5..5, 8, 42u32, &|_| 0, &|a, b| a + b);
        assert_eq!(got, 42);
    }

    #[test]
    fn test_for_covers_range_once() {
        let hits: Vec<AtomicUsize> = (0..5000).map(|_| AtomicUsize::new(0)).collect();
        parallel_for(0..hits.len(), 128, &|r| {
            for i in r {
                hits[i].fetch_add(1, Ordering::Relaxed);
            }
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }
}
