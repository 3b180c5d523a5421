//! Replayable perturbation noise
//! ---
//!
//! Noise is never stored or transmitted.  Every value is a pure function of
//! `(seed, generation, row, column)`: the parameter dimension is cut into
//! fixed size blocks and each `(generation, row, block)` triple seeds its own
//! `XorShiftRng`.  Any node can therefore rebuild any rectangle of the
//! `popsize × num_parameters` noise matrix on its own, and asking twice within
//! a generation yields bit-identical values.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use rand::distributions::{Distribution as Sample, Normal, Uniform};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, ShapeError};

/// Number of consecutive parameters drawn from one seeded stream
pub const BLOCK_SIZE: usize = 256;

// Columns handled by one task in the transpose product
const COL_CHUNK: usize = 512;

/// Distribution the perturbations are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    /// Standard normal
    Gaussian,
    /// Uniform on `[-√3, √3)`, which has zero mean and unit variance
    Uniform,
}

impl FromStr for Distribution {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "gaussian" | "normal" => Ok(Distribution::Gaussian),
            "uniform" => Ok(Distribution::Uniform),
            _ => Err(ConfigError::UnsupportedDistribution(s.into())),
        }
    }
}

/// How population members are drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sampling {
    /// Every row is an independent draw
    Plain,
    /// The first half is drawn, the second half is its negation
    Antithetic,
}

impl FromStr for Sampling {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "plain" | "standard" => Ok(Sampling::Plain),
            "antithetic" | "mirrored" => Ok(Sampling::Antithetic),
            _ => Err(ConfigError::UnsupportedSampling(s.into())),
        }
    }
}

/// Which part of the noise matrix a node materializes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseLayout {
    /// The whole `popsize × num_parameters` matrix on every node
    Full,
    /// Only the rows of the node's population fold
    SliceH,
    /// All rows, but only the node's shard of parameter columns
    SliceV,
}

/// Construction parameters for a `NoiseGenerator`.  Every node must use the
/// same values, except for `rank`.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSettings {
    /// Population size, already a multiple of `nodes` when slicing rows
    pub popsize: usize,
    /// Length of a parameter vector
    pub num_parameters: usize,
    /// Number of nodes sharing the work
    pub nodes: usize,
    /// Local rank
    pub rank: usize,
    /// Distribution of each value
    pub distribution: Distribution,
    /// Plain or antithetic rows
    pub sampling: Sampling,
    /// Layout used to perturb theta
    pub mutate_layout: NoiseLayout,
    /// Layout used to estimate the gradient
    pub update_layout: NoiseLayout,
    /// Global seed
    pub seed: u64,
}

/// Dense row-major block of the noise matrix
#[derive(Clone, PartialEq)]
pub struct NoiseMatrix {
    rows: usize,
    cols: usize,
    row_offset: usize,
    col_offset: usize,
    data: Vec<f32>,
}

impl fmt::Debug for NoiseMatrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "NoiseMatrix({}x{} at ({}, {}))",
            self.rows, self.cols, self.row_offset, self.col_offset
        )
    }
}

impl NoiseMatrix {
    /// Wraps a row-major buffer
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(ShapeError::Length {
                what: "noise matrix",
                expected: rows * cols,
                found: data.len(),
            }
            .into());
        }
        Ok(NoiseMatrix {
            rows: rows,
            cols: cols,
            row_offset: 0,
            col_offset: 0,
            data: data,
        })
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns, including any padding
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Population index of the first row
    pub fn row_offset(&self) -> usize {
        self.row_offset
    }

    /// Parameter index of the first column
    pub fn col_offset(&self) -> usize {
        self.col_offset
    }

    /// Gets a single row
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Row-major values
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Computes `out = selfᵗ · weights`
    pub fn transpose_mul(&self, weights: &[f32], out: &mut [f32]) -> Result<()> {
        self.transpose_mul_with(weights, out, |x| x)
    }

    /// Computes `out[j] = Σ_i f(self[i][j]) · weights[i]`.  Each output column
    /// is accumulated by a single task in row order, so the result does not
    /// depend on the thread count.
    pub fn transpose_mul_with<F>(&self, weights: &[f32], out: &mut [f32], f: F) -> Result<()>
    where
        F: Fn(f32) -> f32 + Sync,
    {
        if weights.len() != self.rows {
            return Err(ShapeError::Length {
                what: "noise weights",
                expected: self.rows,
                found: weights.len(),
            }
            .into());
        }
        if out.len() != self.cols {
            return Err(ShapeError::Length {
                what: "gradient",
                expected: self.cols,
                found: out.len(),
            }
            .into());
        }

        let cols = self.cols;
        let data = &self.data;
        out.par_chunks_mut(COL_CHUNK)
            .enumerate()
            .for_each(|(c, chunk)| {
                let start = c * COL_CHUNK;
                for o in chunk.iter_mut() {
                    *o = 0.;
                }
                for (r, w) in weights.iter().enumerate() {
                    let offset = r * cols + start;
                    let row = &data[offset..offset + chunk.len()];
                    for (o, x) in chunk.iter_mut().zip(row) {
                        *o += f(*x) * w;
                    }
                }
            });
        Ok(())
    }
}

// Draws single values from the configured distribution
#[derive(Debug, Clone)]
enum Sampler {
    Gaussian(Normal),
    Uniform(Uniform<f32>),
}

impl Sampler {
    fn new(d: Distribution) -> Self {
        match d {
            Distribution::Gaussian => Sampler::Gaussian(Normal::new(0., 1.)),
            Distribution::Uniform => {
                let a = 3f32.sqrt();
                Sampler::Uniform(Uniform::new(-a, a))
            }
        }
    }

    #[inline]
    fn sample(&self, rng: &mut XorShiftRng) -> f32 {
        match self {
            Sampler::Gaussian(n) => n.sample(rng) as f32,
            Sampler::Uniform(u) => u.sample(rng),
        }
    }
}

#[inline]
fn splitmix64(z: u64) -> u64 {
    let mut z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of the stream holding `block` of `row` in `generation`
pub fn block_seed(seed: u64, generation: u64, row: u64, block: u64) -> u64 {
    let h = splitmix64(seed);
    let h = splitmix64(h ^ generation);
    let h = splitmix64(h ^ row);
    splitmix64(h ^ block)
}

/// Deterministic noise source shared, by construction, across nodes
#[derive(Debug, Clone)]
pub struct NoiseGenerator {
    settings: NoiseSettings,
    sampler: Sampler,
    generation: u64,
    fold: usize,
    chunk: usize,
}

impl NoiseGenerator {
    /// Validates the settings and builds a generator at generation zero
    pub fn new(settings: NoiseSettings) -> Result<Self> {
        if settings.mutate_layout == NoiseLayout::SliceV {
            return Err(ConfigError::InvalidMutateLayout(settings.mutate_layout).into());
        }
        if settings.nodes == 0 || settings.rank >= settings.nodes {
            return Err(ConfigError::InvalidRank {
                rank: settings.rank,
                nodes: settings.nodes,
            }
            .into());
        }
        let slices_rows = settings.mutate_layout == NoiseLayout::SliceH
            || settings.update_layout == NoiseLayout::SliceH;
        if slices_rows && settings.popsize % settings.nodes != 0 {
            return Err(ShapeError::UnevenFolds {
                len: settings.popsize,
                nodes: settings.nodes,
            }
            .into());
        }

        let fold = settings.popsize / settings.nodes;
        // Round up so every node owns a shard of identical width
        let chunk = (settings.num_parameters + settings.nodes - 1) / settings.nodes;
        Ok(NoiseGenerator {
            sampler: Sampler::new(settings.distribution),
            settings: settings,
            generation: 0,
            fold: fold,
            chunk: chunk,
        })
    }

    /// Moves to the next generation.  Noise requested afterwards is unrelated
    /// to the noise of the previous generation.
    pub fn step(&mut self) -> () {
        self.generation += 1;
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Settings the generator was built with
    pub fn settings(&self) -> &NoiseSettings {
        &self.settings
    }

    /// Population rows owned by this node
    pub fn fold_range(&self) -> Range<usize> {
        let start = self.settings.rank * self.fold;
        start..start + self.fold
    }

    /// Width of a column shard, rounded up so all nodes agree
    pub fn chunk(&self) -> usize {
        self.chunk
    }

    /// Parameter columns owned by this node, without padding
    pub fn column_shard(&self) -> Range<usize> {
        let p = self.settings.num_parameters;
        let start = (self.settings.rank * self.chunk).min(p);
        start..(start + self.chunk).min(p)
    }

    /// Noise used to turn theta into population members
    pub fn generate_mutate_noise(&self) -> NoiseMatrix {
        self.generate(self.settings.mutate_layout)
    }

    /// Noise used, together with shaped fitness, to estimate the gradient
    pub fn generate_update_noise(&self) -> NoiseMatrix {
        self.generate(self.settings.update_layout)
    }

    fn generate(&self, layout: NoiseLayout) -> NoiseMatrix {
        let popsize = self.settings.popsize;
        let p = self.settings.num_parameters;
        match layout {
            NoiseLayout::Full => self.generate_rows(0..popsize, 0..p, p),
            NoiseLayout::SliceH => self.generate_rows(self.fold_range(), 0..p, p),
            NoiseLayout::SliceV => {
                let start = self.settings.rank * self.chunk;
                self.generate_rows(0..popsize, self.column_shard(), self.chunk)
                    .with_col_offset(start)
            }
        }
    }

    /// Rebuilds the rectangle `rows × cols` of the current generation into a
    /// matrix `width` columns wide.  Columns past `cols` are zero.
    pub fn generate_rows(&self, rows: Range<usize>, cols: Range<usize>, width: usize) -> NoiseMatrix {
        assert!(cols.end - cols.start <= width);
        let n_rows = rows.end - rows.start;
        let mut data = vec![0f32; n_rows * width];
        if width > 0 {
            data.par_chunks_mut(width)
                .enumerate()
                .for_each(|(i, out)| {
                    let valid = cols.end - cols.start;
                    self.fill_row(rows.start + i, cols.start, &mut out[..valid]);
                });
        }

        NoiseMatrix {
            rows: n_rows,
            cols: width,
            row_offset: rows.start,
            col_offset: cols.start,
            data: data,
        }
    }

    // Antithetic rows in the second half mirror a row of the first half
    fn source_row(&self, row: usize) -> (usize, f32) {
        match self.settings.sampling {
            Sampling::Plain => (row, 1.),
            Sampling::Antithetic => {
                let half = (self.settings.popsize + 1) / 2;
                if row >= half {
                    (row - half, -1.)
                } else {
                    (row, 1.)
                }
            }
        }
    }

    // Writes columns `col_start..col_start + out.len()` of `row`
    fn fill_row(&self, row: usize, col_start: usize, out: &mut [f32]) -> () {
        let (source, sign) = self.source_row(row);
        let p = self.settings.num_parameters;
        let end = col_start + out.len();
        let mut buffer = [0f32; BLOCK_SIZE];
        let mut col = col_start;
        let mut written = 0;
        while col < end {
            let block = col / BLOCK_SIZE;
            let block_start = block * BLOCK_SIZE;
            let block_len = BLOCK_SIZE.min(p - block_start);
            let mut rng = XorShiftRng::seed_from_u64(block_seed(
                self.settings.seed,
                self.generation,
                source as u64,
                block as u64,
            ));
            for v in buffer[..block_len].iter_mut() {
                *v = sign * self.sampler.sample(&mut rng);
            }

            let take_end = end.min(block_start + block_len);
            let n = take_end - col;
            out[written..written + n]
                .copy_from_slice(&buffer[col - block_start..take_end - block_start]);
            written += n;
            col = take_end;
        }
    }
}

impl NoiseMatrix {
    fn with_col_offset(mut self, offset: usize) -> Self {
        self.col_offset = offset;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(popsize: usize, num_parameters: usize, nodes: usize, rank: usize) -> NoiseSettings {
        NoiseSettings {
            popsize: popsize,
            num_parameters: num_parameters,
            nodes: nodes,
            rank: rank,
            distribution: Distribution::Gaussian,
            sampling: Sampling::Plain,
            mutate_layout: NoiseLayout::SliceH,
            update_layout: NoiseLayout::Full,
            seed: 1234,
        }
    }

    #[test]
    fn test_reproducible_within_generation() {
        let mut gen = NoiseGenerator::new(settings(8, 600, 2, 1)).unwrap();
        gen.step();
        let a = gen.generate_mutate_noise();
        let b = gen.generate_mutate_noise();
        assert_eq!(a.as_slice(), b.as_slice());

        let c = gen.generate_update_noise();
        let d = gen.generate_update_noise();
        assert_eq!(c.as_slice(), d.as_slice());

        gen.step();
        let e = gen.generate_mutate_noise();
        assert_ne!(a.as_slice(), e.as_slice());
        let f = gen.generate_update_noise();
        assert_ne!(c.as_slice(), f.as_slice());
    }

    #[test]
    fn test_mutate_matches_update() {
        let mut gen = NoiseGenerator::new(settings(6, 700, 3, 2)).unwrap();
        gen.step();
        let mutate = gen.generate_mutate_noise();
        let update = gen.generate_update_noise();
        assert_eq!(mutate.rows(), 2);
        assert_eq!(mutate.row_offset(), 4);
        assert_eq!(update.rows(), 6);
        for i in 0..mutate.rows() {
            assert_eq!(mutate.row(i), update.row(mutate.row_offset() + i));
        }
    }

    #[test]
    fn test_nodes_agree() {
        // Two generators standing in for two processes
        let mut g0 = NoiseGenerator::new(settings(4, 300, 2, 0)).unwrap();
        let mut g1 = NoiseGenerator::new(settings(4, 300, 2, 1)).unwrap();
        g0.step();
        g1.step();
        let full0 = g0.generate_update_noise();
        let full1 = g1.generate_update_noise();
        assert_eq!(full0.as_slice(), full1.as_slice());

        let fold1 = g1.generate_mutate_noise();
        assert_eq!(fold1.row(0), full0.row(2));
        assert_eq!(fold1.row(1), full0.row(3));
    }

    #[test]
    fn test_antithetic() {
        for &popsize in &[2, 6, 10] {
            let mut s = settings(popsize, 333, 1, 0);
            s.sampling = Sampling::Antithetic;
            s.mutate_layout = NoiseLayout::Full;
            let mut gen = NoiseGenerator::new(s).unwrap();
            gen.step();
            let noise = gen.generate_mutate_noise();
            let half = popsize / 2;
            for i in 0..half {
                let neg: Vec<f32> = noise.row(i).iter().map(|x| -x).collect();
                assert_eq!(noise.row(i + half), &neg[..]);
            }
        }
    }

    #[test]
    fn test_vertical_slices() {
        let p = 10;
        let full = {
            let mut gen = NoiseGenerator::new(settings(3, p, 1, 0)).unwrap();
            gen.step();
            gen.generate_update_noise()
        };

        let nodes = 3;
        for rank in 0..nodes {
            let mut s = settings(3, p, nodes, rank);
            s.update_layout = NoiseLayout::SliceV;
            let mut gen = NoiseGenerator::new(s).unwrap();
            gen.step();
            assert_eq!(gen.chunk(), 4);
            let shard = gen.generate_update_noise();
            assert_eq!(shard.rows(), 3);
            assert_eq!(shard.cols(), 4);
            assert_eq!(shard.col_offset(), rank * 4);
            for r in 0..3 {
                for c in 0..4 {
                    let col = rank * 4 + c;
                    let expected = if col < p { full.row(r)[col] } else { 0. };
                    assert_eq!(shard.row(r)[c], expected);
                }
            }
        }
    }

    #[test]
    fn test_blocks_are_independent() {
        let mut gen = NoiseGenerator::new(settings(2, 3 * BLOCK_SIZE + 5, 1, 0)).unwrap();
        gen.step();
        let full = gen.generate_update_noise();
        let part = gen.generate_rows(1..2, BLOCK_SIZE - 3..2 * BLOCK_SIZE + 7, BLOCK_SIZE + 10);
        assert_eq!(part.row(0), &full.row(1)[BLOCK_SIZE - 3..2 * BLOCK_SIZE + 7]);
    }

    #[test]
    fn test_distributions() {
        let mut s = settings(100, 1000, 1, 0);
        s.mutate_layout = NoiseLayout::Full;
        let mut gen = NoiseGenerator::new(s.clone()).unwrap();
        gen.step();
        let noise = gen.generate_mutate_noise();
        let n = noise.as_slice().len() as f32;
        let mean = noise.as_slice().iter().sum::<f32>() / n;
        let var = noise.as_slice().iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 0.02, "mean: {}", mean);
        assert!((var - 1.).abs() < 0.05, "var: {}", var);

        s.distribution = Distribution::Uniform;
        let mut gen = NoiseGenerator::new(s).unwrap();
        gen.step();
        let noise = gen.generate_mutate_noise();
        let a = 3f32.sqrt();
        assert!(noise.as_slice().iter().all(|x| *x >= -a && *x < a));
        let var = noise.as_slice().iter().map(|x| x * x).sum::<f32>() / n;
        assert!((var - 1.).abs() < 0.05, "var: {}", var);
    }

    #[test]
    fn test_invalid_settings() {
        let mut s = settings(8, 10, 2, 0);
        s.mutate_layout = NoiseLayout::SliceV;
        assert!(NoiseGenerator::new(s).is_err());

        let s = settings(7, 10, 2, 0);
        assert!(NoiseGenerator::new(s).is_err());

        let s = settings(8, 10, 2, 2);
        assert!(NoiseGenerator::new(s).is_err());
    }

    #[test]
    fn test_transpose_mul() {
        let m = NoiseMatrix::from_vec(2, 3, vec![1., 2., 3., 4., 5., 6.]).unwrap();
        let mut out = vec![0f32; 3];
        m.transpose_mul(&[1., -1.], &mut out).unwrap();
        assert_eq!(out, vec![-3., -3., -3.]);

        m.transpose_mul_with(&[0.5, 1.], &mut out, |x| x * x - 1.).unwrap();
        assert_eq!(out, vec![15., 25.5, 39.]);

        assert!(m.transpose_mul(&[1.], &mut out).is_err());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Gaussian".parse::<Distribution>().unwrap(), Distribution::Gaussian);
        assert_eq!("uniform".parse::<Distribution>().unwrap(), Distribution::Uniform);
        assert!("Cauchy".parse::<Distribution>().is_err());
        assert_eq!("Antithetic".parse::<Sampling>().unwrap(), Sampling::Antithetic);
        assert!("lhs".parse::<Sampling>().is_err());
    }
}
