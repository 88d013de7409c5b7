//! Batch scheduler: cuts an ordered file list into batches bounded by count and memory.
//!
//! Scheduling is a single sequential pass. Files are never reordered to pack batches more
//! tightly, so the caller's ordering survives and the cost stays linear.

use sysinfo::System;
use tracing::debug;

/// Anything with a byte size the scheduler can budget for.
pub trait HasSize {
    fn size_bytes(&self) -> u64;
}

impl HasSize for u64 {
    fn size_bytes(&self) -> u64 {
        *self
    }
}

/// Bounds applied to every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum items per batch. Must be > 0.
    pub concurrency_limit: usize,
    /// Exclusive upper bound on the summed size of a batch when `check_memory` is set.
    pub available_memory: u64,
    pub check_memory: bool,
}

/// An ordered group of items processed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    /// Position of the batch in the schedule, from 0.
    pub index: usize,
    pub items: Vec<T>,
}

impl<T: HasSize> Batch<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(HasSize::size_bytes).sum()
    }
}

/// Partition `items` into batches, preserving order.
///
/// An item joins the current batch while the batch holds fewer than `concurrency_limit` items
/// and, with memory checking on, the batch total including the item stays below
/// `available_memory`. Otherwise the current batch is closed and the item opens the next one.
/// An item larger than the memory budget still gets a batch of its own; nothing is dropped.
///
/// Only an empty input yields an empty batch (a single one).
///
/// # Panics
///
/// Panics if `limits.concurrency_limit == 0`.
pub fn schedule<T: HasSize>(items: Vec<T>, limits: BatchLimits) -> Vec<Batch<T>> {
    assert!(limits.concurrency_limit > 0, "concurrency_limit must be > 0");

    let mut batches: Vec<Batch<T>> = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_bytes: u64 = 0;

    for item in items {
        let size = item.size_bytes();
        let fits_count = current.len() < limits.concurrency_limit;
        let fits_memory = !limits.check_memory
            || current.is_empty()
            || current_bytes.saturating_add(size) < limits.available_memory;

        if !(fits_count && fits_memory) {
            batches.push(Batch {
                index: batches.len(),
                items: std::mem::take(&mut current),
            });
            current_bytes = 0;
        }
        current_bytes = current_bytes.saturating_add(size);
        current.push(item);
    }

    batches.push(Batch {
        index: batches.len(),
        items: current,
    });

    debug!(batches = batches.len(), "schedule built");
    batches
}

/// Memory currently available to new allocations, in bytes.
pub fn available_memory() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(concurrency_limit: usize, available_memory: u64, check_memory: bool) -> BatchLimits {
        BatchLimits {
            concurrency_limit,
            available_memory,
            check_memory,
        }
    }

    fn flatten(batches: &[Batch<u64>]) -> Vec<u64> {
        batches.iter().flat_map(|b| b.items.iter().copied()).collect()
    }

    /// Small deterministic generator so the property checks cover many shapes.
    fn sizes(seed: u64, n: usize) -> Vec<u64> {
        let mut x = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (0..n)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                x % 200
            })
            .collect()
    }

    #[test]
    fn batches_partition_input_in_order() {
        for seed in 0..50u64 {
            for n in [0usize, 1, 2, 7, 31] {
                let input = sizes(seed, n);
                for lim in [1usize, 2, 3, 8] {
                    for check in [false, true] {
                        let batches = schedule(input.clone(), limits(lim, 250, check));
                        assert_eq!(flatten(&batches), input);
                        for (i, b) in batches.iter().enumerate() {
                            assert_eq!(b.index, i);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn batches_respect_count_and_memory_bounds() {
        for seed in 0..50u64 {
            let input = sizes(seed, 40);
            for lim in [1usize, 2, 5] {
                for b in schedule(input.clone(), limits(lim, 10_000, false)) {
                    assert!(b.len() <= lim);
                }
                for b in schedule(input.clone(), limits(lim, 150, true)) {
                    assert!(b.len() <= lim);
                    assert!(b.total_bytes() < 150 || b.len() == 1);
                }
            }
        }
    }

    #[test]
    fn oversized_file_gets_its_own_batch() {
        let batches = schedule(vec![10, 500, 10], limits(4, 100, true));
        let shapes: Vec<Vec<u64>> = batches.into_iter().map(|b| b.items).collect();
        assert_eq!(shapes, vec![vec![10], vec![500], vec![10]]);
    }

    #[test]
    fn empty_input_yields_one_empty_batch() {
        let batches = schedule(Vec::<u64>::new(), limits(3, 100, true));
        assert_eq!(batches.len(), 1);
        assert!(batches[0].is_empty());
    }

    #[test]
    fn count_bound_only_when_memory_unchecked() {
        let batches = schedule(vec![90, 90, 90, 90, 90], limits(2, 1, false));
        let shapes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(shapes, vec![2, 2, 1]);
    }
}
