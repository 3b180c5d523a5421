//! Rank based fitness shaping.
//!
//! Both transforms replace raw fitness values with weights derived only from
//! their rank order, which makes the search gradient invariant to the scale
//! and offset of the loss.  Ties keep their original index order.

use float_ord::FloatOrd;

// Indices of `values`, sorted ascending.  The sort is stable, so equal values
// stay in index order.
fn argsort(values: &[f32]) -> Vec<usize> {
    let mut idxs: Vec<usize> = (0..values.len()).collect();
    idxs.sort_by_key(|i| FloatOrd(values[*i]));
    idxs
}

/// Maps every value onto evenly spaced points in `[-0.5, 0.5]` according to its
/// rank, the smallest value getting `-0.5` and the largest `0.5`.  When
/// minimizing a loss, negate it before calling this.
pub fn centered_ranks(values: &[f32]) -> Vec<f32> {
    let len = values.len();
    let mut out = vec![0f32; len];
    if len < 2 {
        return out;
    }

    let denom = (len - 1) as f32;
    for (rank, idx) in argsort(values).into_iter().enumerate() {
        out[idx] = rank as f32 / denom - 0.5;
    }
    out
}

/// NES utilities (Wierstra et al.) with a configurable cutoff.  Only about the
/// top `ratio` fraction of the population (largest values) receives a weight
/// above the baseline; the weights always sum to zero.
///
/// `ratio` must be in `(0, 1]`.  The classic NES utility is `ratio = 0.5`.
pub fn normalized_ranks(values: &[f32], ratio: f32) -> Vec<f32> {
    assert!(ratio > 0. && ratio <= 1., "cutoff ratio must be in (0, 1]");
    let len = values.len();
    let mut out = vec![0f32; len];
    if len == 0 {
        return out;
    }

    let cutoff = (ratio * len as f32 + 1.).ln();
    let mut sum = 0.;
    // Best first, ties stay in index order
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by_key(|i| FloatOrd(-values[*i]));
    for (rank, idx) in order.into_iter().enumerate() {
        let nom = (0f32).max(cutoff - ((rank + 1) as f32).ln());
        out[idx] = nom;
        sum += nom;
    }

    let baseline = 1. / len as f32;
    for u in out.iter_mut() {
        *u = *u / sum - baseline;
    }
    out
}
