//! Batch Planner (C4): chooses parallelism and batch count, partitions the
//! left input's rowid span into half-open intervals.
//!
//! See `spec.md` §4.4 for the algorithm this follows step for step, and §9
//! for the resolved open question: width is computed uniformly as
//! `(max_rowid - min_rowid) / B` for both single- and two-layer operations,
//! rather than recomputing a second reduction in the single-layer path the
//! way the original source did.

use crate::op_error::{GfoError, Result};

/// A single batch's half-open rowid interval. `end = None` marks the
/// terminal batch, whose upper bound is open-ended to absorb any residual
/// rowids above `start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowidRange {
    pub start: i64,
    pub end: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Batch {
    pub batch_id: usize,
    pub range: RowidRange,
}

#[derive(Clone, Debug)]
pub struct ProcessingPlan {
    pub parallelism: usize,
    pub batches: Vec<Batch>,
    pub feature_count: u64,
    pub min_rowid: i64,
    pub max_rowid: i64,
}

impl ProcessingPlan {
    /// §4.3's rule that `batch_filter` is empty whenever there's only one
    /// batch.
    pub fn single_batch(&self) -> bool {
        self.batches.len() <= 1
    }
}

/// `plan(featurecount, rowid_extrema, nb_parallel_hint, is_two_layer)`.
///
/// `rowid_extrema` is `None` for an empty layer (§4.4's empty-layer edge
/// case); otherwise `Some((min_rowid, max_rowid))` from the left input.
pub fn plan(
    feature_count: u64,
    rowid_extrema: Option<(i64, i64)>,
    nb_parallel_hint: i64,
    is_two_layer: bool,
) -> Result<ProcessingPlan> {
    if feature_count == 0 {
        return Ok(ProcessingPlan {
            parallelism: 1,
            batches: vec![Batch {
                batch_id: 0,
                range: RowidRange { start: 0, end: None },
            }],
            feature_count: 0,
            min_rowid: 0,
            max_rowid: 0,
        });
    }

    let (min_rowid, max_rowid) = rowid_extrema.ok_or_else(|| {
        GfoError::Plan("failed to obtain rowid extrema for a non-empty layer".to_string())
    })?;

    let mut parallelism: usize = if nb_parallel_hint == -1 {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let max_parallel = (feature_count / 100) as usize;
        let mut p = cpu_count.min(max_parallel.max(0));
        if p > 4 {
            p -= 1;
        }
        if p < 1 {
            p = 1;
        }
        p
    } else {
        nb_parallel_hint.max(1) as usize
    };

    let mut batch_count = if is_two_layer {
        let mut b = 4 * parallelism;
        let cap = ((feature_count / 10) as usize).max(1);
        if b > cap {
            b = cap;
        }
        b
    } else {
        parallelism
    };
    if parallelism == 1 {
        batch_count = 1;
    }

    if batch_count < parallelism {
        parallelism = batch_count;
    }

    let width = (max_rowid - min_rowid) / batch_count as i64;

    let mut batches = Vec::with_capacity(batch_count);
    for i in 0..batch_count {
        let start = min_rowid + i as i64 * width;
        let end = if i + 1 == batch_count {
            None
        } else {
            Some(min_rowid + (i as i64 + 1) * width)
        };
        batches.push(Batch {
            batch_id: i,
            range: RowidRange { start, end },
        });
    }

    Ok(ProcessingPlan {
        parallelism,
        batches,
        feature_count,
        min_rowid,
        max_rowid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_layer_yields_single_empty_batch() {
        let p = plan(0, None, -1, false).unwrap();
        assert_eq!(p.parallelism, 1);
        assert_eq!(p.batches.len(), 1);
        assert!(p.single_batch());
    }

    #[test]
    fn nb_parallel_one_forces_single_batch_even_two_layer() {
        let p = plan(10_000, Some((1, 10_000)), 1, true).unwrap();
        assert_eq!(p.parallelism, 1);
        assert_eq!(p.batches.len(), 1);
    }

    #[test]
    fn batches_partition_full_rowid_span() {
        let p = plan(1_000, Some((1, 1001)), 4, false).unwrap();
        assert_eq!(p.batches.len(), 4);
        assert_eq!(p.batches[0].range.start, 1);
        assert!(p.batches.last().unwrap().range.end.is_none());
        for pair in p.batches.windows(2) {
            assert_eq!(pair[0].range.end, Some(pair[1].range.start));
        }
    }

    #[test]
    fn two_layer_batch_count_is_capped_by_featurecount_over_ten() {
        let p = plan(100, Some((1, 100)), 8, true).unwrap();
        // 4*8=32 batches would exceed featurecount/10=10, so it's capped.
        assert_eq!(p.batches.len(), 10);
    }

    #[test]
    fn single_feature_forces_minimal_plan() {
        let p = plan(1, Some((1, 1)), -1, false).unwrap();
        assert_eq!(p.parallelism, 1);
        assert_eq!(p.batches.len(), 1);
    }
}
