// counting-sort passes shared by the uniform grid, the quadtree leaf ordering
// and the LOD coarse grid.
//
// stages (parallel):
//   0: clear counts
//   1: histogram, each key fetch_adds its bucket and keeps the pre-increment rank
//   2: block scan, inclusive prefix sum inside blocks of BLOCK_SIZE buckets
//   3: block sums scan, Hillis-Steele doubling over the block totals (ping/pong)
//   4: add back, block bases folded into the local sums
//   5: rearrange, item i lands at end(bucket) - 1 - rank
//
// the sequential variant runs the same stages in one thread without atomics.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::ExecutionMode;

pub const BLOCK_SIZE: usize = 256;

/// Pass-scoped buffers for [`bucket_sort`]. Owned by the driver, sized once,
/// cleared at the start of every sort.
#[derive(Debug, Default)]
pub struct SortScratch {
    counts: Vec<AtomicU32>,
    ranks: Vec<u32>,
    local: Vec<u32>,
    block_ping: Vec<u32>,
    block_pong: Vec<u32>,
    slots: Vec<AtomicU32>,
}

impl SortScratch {
    pub fn with_capacity(items: usize, buckets: usize) -> Self {
        let mut scratch = Self::default();
        scratch.reserve(items, buckets);
        scratch
    }

    fn reserve(&mut self, items: usize, buckets: usize) {
        if self.counts.len() != buckets {
            self.counts = (0..buckets).map(|_| AtomicU32::new(0)).collect();
            self.local = vec![0; buckets];
            let blocks = buckets.div_ceil(BLOCK_SIZE).max(1);
            self.block_ping = vec![0; blocks];
            self.block_pong = vec![0; blocks];
        }
        if self.slots.len() != items {
            self.slots = (0..items).map(|_| AtomicU32::new(0)).collect();
        }
    }
}

/// Sorts item indices `0..keys.len()` by bucket.
///
/// On return `offsets` has `num_buckets + 1` entries with `offsets[0] == 0`
/// and `offsets[b + 1]` the end of bucket `b`, and `order` lists the items
/// bucket by bucket. Keys must be `< num_buckets`.
pub fn bucket_sort(
    keys: &[u32],
    num_buckets: usize,
    scratch: &mut SortScratch,
    offsets: &mut Vec<u32>,
    order: &mut Vec<u32>,
    mode: ExecutionMode,
) {
    debug_assert!(keys.iter().all(|&k| (k as usize) < num_buckets));
    scratch.reserve(keys.len(), num_buckets);
    offsets.resize(num_buckets + 1, 0);

    match mode {
        ExecutionMode::Parallel => {
            clear_counts(scratch);
            histogram(keys, scratch);
            block_scan(scratch);
            block_sums_scan(scratch);
            add_back(scratch, offsets);
            rearrange(keys, scratch, offsets, order);
        }
        ExecutionMode::Sequential => sequential_sort(keys, scratch, offsets, order),
    }

    debug_assert_eq!(offsets[num_buckets] as usize, keys.len());
}

fn clear_counts(scratch: &SortScratch) {
    scratch
        .counts
        .par_iter()
        .for_each(|c| c.store(0, Ordering::Relaxed));
}

fn histogram(keys: &[u32], scratch: &mut SortScratch) {
    let counts = &scratch.counts;
    keys.par_iter()
        .map(|&k| counts[k as usize].fetch_add(1, Ordering::Relaxed))
        .collect_into_vec(&mut scratch.ranks);
}

fn block_scan(scratch: &mut SortScratch) {
    let counts = &scratch.counts;
    scratch
        .local
        .par_chunks_mut(BLOCK_SIZE)
        .zip(scratch.block_ping.par_iter_mut())
        .enumerate()
        .for_each(|(block, (local, block_sum))| {
            let base = block * BLOCK_SIZE;
            let mut running = 0u32;
            for (i, slot) in local.iter_mut().enumerate() {
                running += counts[base + i].load(Ordering::Relaxed);
                *slot = running;
            }
            *block_sum = running;
        });
}

// log2(blocks) passes; after the loop `block_ping` holds inclusive block sums
fn block_sums_scan(scratch: &mut SortScratch) {
    let blocks = scratch.block_ping.len();
    let mut stride = 1;
    while stride < blocks {
        let src = &scratch.block_ping;
        scratch
            .block_pong
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, out)| {
                *out = if i >= stride { src[i] + src[i - stride] } else { src[i] };
            });
        std::mem::swap(&mut scratch.block_ping, &mut scratch.block_pong);
        stride *= 2;
    }
}

fn add_back(scratch: &mut SortScratch, offsets: &mut [u32]) {
    let block_sums = &scratch.block_ping;
    offsets[0] = 0;
    offsets[1..]
        .par_chunks_mut(BLOCK_SIZE)
        .zip(scratch.local.par_chunks(BLOCK_SIZE))
        .enumerate()
        .for_each(|(block, (out, local))| {
            let base = if block == 0 { 0 } else { block_sums[block - 1] };
            for (o, l) in out.iter_mut().zip(local) {
                *o = base + l;
            }
        });
}

fn rearrange(keys: &[u32], scratch: &mut SortScratch, offsets: &[u32], order: &mut Vec<u32>) {
    let slots = &scratch.slots;
    keys.par_iter()
        .zip(scratch.ranks.par_iter())
        .enumerate()
        .for_each(|(item, (&k, &rank))| {
            let slot = offsets[k as usize + 1] - 1 - rank;
            slots[slot as usize].store(item as u32, Ordering::Relaxed);
        });
    slots
        .par_iter()
        .map(|s| s.load(Ordering::Relaxed))
        .collect_into_vec(order);
}

fn sequential_sort(
    keys: &[u32],
    scratch: &mut SortScratch,
    offsets: &mut [u32],
    order: &mut Vec<u32>,
) {
    for c in scratch.counts.iter_mut() {
        *c.get_mut() = 0;
    }

    scratch.ranks.clear();
    for &k in keys {
        let count = scratch.counts[k as usize].get_mut();
        scratch.ranks.push(*count);
        *count += 1;
    }

    offsets[0] = 0;
    let mut running = 0u32;
    for (b, c) in scratch.counts.iter_mut().enumerate() {
        running += *c.get_mut();
        offsets[b + 1] = running;
    }

    order.clear();
    order.resize(keys.len(), 0);
    for (item, (&k, &rank)) in keys.iter().zip(&scratch.ranks).enumerate() {
        let slot = offsets[k as usize + 1] - 1 - rank;
        order[slot as usize] = item as u32;
    }
}
