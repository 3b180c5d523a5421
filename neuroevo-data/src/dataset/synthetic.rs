use rand::distributions::{Distribution, Normal, Uniform};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use super::LabeledData;
use crate::datatypes::Matrix;
use crate::intrinsics::dot;

/// Gaussian clusters, one per class.  Sample `i` belongs to class
/// `i % classes`; centers are drawn uniformly from `[-2, 2)` per dimension.
pub fn blobs(n: usize, dims: usize, classes: usize, spread: f32, seed: u64) -> LabeledData {
    assert!(classes > 0, "need at least one class");
    let mut rng = XorShiftRng::seed_from_u64(seed);
    let uniform = Uniform::new(-2f32, 2f32);
    let normal = Normal::new(0., spread as f64);

    let centers: Vec<Vec<f32>> = (0..classes)
        .map(|_| (0..dims).map(|_| uniform.sample(&mut rng)).collect())
        .collect();

    let mut x = Matrix::zeros(n, dims);
    let mut y = Vec::with_capacity(n);
    for i in 0..n {
        let class = i % classes;
        for (v, c) in x.row_mut(i).iter_mut().zip(centers[class].iter()) {
            *v = c + normal.sample(&mut rng) as f32;
        }
        y.push(class as f32);
    }
    LabeledData { x: x, y: y }
}

/// Noisy linear targets `y = w · x + b + noise` with `x ~ N(0, 1)`.  Returns the
/// data along with `w` and `b`.
pub fn linear(n: usize, dims: usize, noise: f32, seed: u64) -> (LabeledData, Vec<f32>, f32) {
    let mut rng = XorShiftRng::seed_from_u64(seed);
    let normal = Normal::new(0., 1.);
    let w: Vec<f32> = (0..dims).map(|_| normal.sample(&mut rng) as f32).collect();
    let b = normal.sample(&mut rng) as f32;

    let mut x = Matrix::zeros(n, dims);
    let mut y = Vec::with_capacity(n);
    for i in 0..n {
        let row = x.row_mut(i);
        for v in row.iter_mut() {
            *v = normal.sample(&mut rng) as f32;
        }
        y.push(dot(row, &w) + b + noise * normal.sample(&mut rng) as f32);
    }
    (LabeledData { x: x, y: y }, w, b)
}
