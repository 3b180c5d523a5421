//! Helper functions for dense vector math
//!
//! Loops work on fixed lanes of 8 so the compiler can vectorize them on any
//! target, and reductions always combine the lanes in the same order.

const LANES: usize = 8;

/// In-place summation
pub fn inplace_sum(v1: &mut [f32], v2: &[f32]) -> () {
    assert_eq!(v1.len(), v2.len());
    for (l, r) in v1.iter_mut().zip(v2) {
        *l += r;
    }
}

/// Dot product
pub fn dot(v1: &[f32], v2: &[f32]) -> f32 {
    assert_eq!(v1.len(), v2.len());
    let mut acc = [0f32; LANES];
    let l_chunks = v1.chunks_exact(LANES);
    let r_chunks = v2.chunks_exact(LANES);
    let (l_rem, r_rem) = (l_chunks.remainder(), r_chunks.remainder());
    for (l, r) in l_chunks.zip(r_chunks) {
        for j in 0..LANES {
            acc[j] += l[j] * r[j];
        }
    }

    let mut sum = acc.iter().sum::<f32>();
    // Remainder
    for (l, r) in l_rem.iter().zip(r_rem) {
        sum += l * r;
    }
    sum
}

/// L2 norm
pub fn l2norm(v1: &[f32]) -> f32 {
    dot(v1, v1).sqrt()
}

/// Index of the largest value, the first one on ties.  `None` when empty.
pub fn argmax(v1: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, v) in v1.iter().enumerate() {
        match best {
            Some((_, b)) if *v <= b => {}
            _ => best = Some((i, *v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Numerically stable `ln Σ exp(v)`
pub fn log_sum_exp(v1: &[f32]) -> f32 {
    let max = v1.iter().cloned().fold(std::f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return max;
    }
    let s: f32 = v1.iter().map(|v| (v - max).exp()).sum();
    max + s.ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inplace_sum() {
        let mut v1 = [1., 2., 3.];
        inplace_sum(&mut v1, &[1., 1., -1.]);
        assert_eq!(v1, [2., 3., 2.]);
    }

    #[test]
    fn test_dot() {
        let v1 = [1., 2., 3., 4., 5., 6., 7., 8., 9., 10.];
        assert_eq!(dot(&v1, &v1), 385.);

        let v1 = [1., 2., 3., 4., 5.];
        let v2 = [0.0; 5];
        assert_eq!(dot(&v1, &v2), 0.);

        // Exactly one lane
        let v1 = [1.; 8];
        assert_eq!(dot(&v1, &v1), 8.);
    }

    #[test]
    fn test_l2norm() {
        let v1 = [1., 2., 3., 4., 5., 6., 7., 8., 9., 10.];
        assert!((l2norm(&v1) - 19.6214168).abs() < 1e-5);

        let v1 = [1.];
        assert_eq!(l2norm(&v1), 1.);
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 3., -1., 3.]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_log_sum_exp() {
        let v = [1000f32, 1000.];
        assert!((log_sum_exp(&v) - (1000. + 2f32.ln())).abs() < 1e-3);
        let v = [0f32, 0., 0.];
        assert!((log_sum_exp(&v) - 3f32.ln()).abs() < 1e-6);
    }
}
