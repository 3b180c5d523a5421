//! Dataset
//! ---
//!
//! Dataset defines labeled sample sets, and static and minibatch views over
//! them.  Batches are built eagerly for an epoch; the rows of each batch are
//! gathered in parallel.
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use rayon::prelude::*;

use crate::datatypes::Matrix;
use crate::intrinsics::argmax;
use crate::load::LoadError;

/// Defines the parsers for feature columns
pub mod types;

/// Generated datasets for examples and tests
pub mod synthetic;

/// Eager iterator over the batches of one epoch
pub type EagerIterator = std::vec::IntoIter<Batch>;

#[derive(Debug, Clone, PartialEq)]
/// Features and labels of a set of samples
pub struct Batch {
    /// One row per sample
    pub x: Matrix,
    /// One label per sample
    pub y: Vec<f32>,
}

impl Batch {
    /// Number of samples
    pub fn len(&self) -> usize {
        self.y.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A full set of labeled samples
pub struct LabeledData {
    x: Matrix,
    y: Vec<f32>,
}

impl LabeledData {
    /// Pairs features with labels
    pub fn new(x: Matrix, y: Vec<f32>) -> Result<Self, LoadError> {
        if x.rows() != y.len() {
            return Err(LoadError::Shape {
                what: "labels",
                expected: x.rows(),
                found: y.len(),
            });
        }
        Ok(LabeledData { x: x, y: y })
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.y.len()
    }

    /// True when there are no samples
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Number of features
    pub fn dims(&self) -> usize {
        self.x.cols()
    }

    /// Features
    pub fn x(&self) -> &Matrix {
        &self.x
    }

    /// Labels
    pub fn y(&self) -> &[f32] {
        &self.y
    }

    /// Number of classes, assuming labels are class indices `0..k`
    pub fn num_classes(&self) -> usize {
        argmax(&self.y).map(|i| self.y[i] as usize + 1).unwrap_or(0)
    }

    /// Gathers the samples at `indices`
    pub fn batch(&self, indices: &[usize]) -> Batch {
        Batch {
            x: self.x.select(indices),
            y: indices.iter().map(|i| self.y[*i]).collect(),
        }
    }

    /// The whole set as a single batch
    pub fn as_batch(&self) -> Batch {
        Batch {
            x: self.x.clone(),
            y: self.y.clone(),
        }
    }

    /// The part of the data node `rank` of `nodes` trains on.  Every node gets
    /// `ceil(len / nodes)` samples: indices are padded by wrapping around, then
    /// dealt out round robin.
    pub fn shard(&self, rank: usize, nodes: usize) -> LabeledData {
        assert!(nodes > 0 && rank < nodes, "rank {} out of range for {} nodes", rank, nodes);
        let len = self.len();
        if len == 0 {
            return self.clone();
        }
        let per_node = (len + nodes - 1) / nodes;
        let total = per_node * nodes;
        let indices: Vec<usize> = (0..total)
            .map(|i| i % len)
            .skip(rank)
            .step_by(nodes)
            .collect();
        let b = self.batch(&indices);
        LabeledData { x: b.x, y: b.y }
    }

    /// Splits off the last `fraction` of the samples, e.g. as a test set
    pub fn split(&self, fraction: f32) -> (LabeledData, LabeledData) {
        let n_tail = ((self.len() as f32) * fraction).round() as usize;
        let n_head = self.len() - n_tail.min(self.len());
        let head: Vec<usize> = (0..n_head).collect();
        let tail: Vec<usize> = (n_head..self.len()).collect();
        let (h, t) = (self.batch(&head), self.batch(&tail));
        (LabeledData { x: h.x, y: h.y }, LabeledData { x: t.x, y: t.y })
    }

    fn batches(&self, order: &[usize], batch_size: usize) -> EagerIterator {
        let batches: Vec<Batch> = order
            .par_chunks(batch_size.max(1))
            .map(|idx| self.batch(idx))
            .collect();
        batches.into_iter()
    }
}

/// Trait defining methods for getting the current dataset
pub trait Dataset: Send + Sync {
    /// Shuffles the data if needed and returns whether a shuffle happened
    fn shuffle(&mut self) -> bool;

    /// Batches of the current epoch
    fn data(&self) -> EagerIterator;

    /// Gets all the data
    fn all(&self) -> &LabeledData;
}

/// Dataset for training on the data in a fixed order
pub struct StaticDataset {
    set: Arc<LabeledData>,
    order: Vec<usize>,
    batch_size: usize,
}

impl StaticDataset {
    /// Returns a new StaticDataset
    pub fn new(set: Arc<LabeledData>, batch_size: usize) -> Self {
        StaticDataset {
            order: (0..set.len()).collect(),
            set: set,
            batch_size: batch_size,
        }
    }
}

impl Dataset for StaticDataset {
    /// This does not shuffle
    fn shuffle(&mut self) -> bool {
        false
    }

    fn data(&self) -> EagerIterator {
        self.set.batches(&self.order, self.batch_size)
    }

    fn all(&self) -> &LabeledData {
        &self.set
    }
}

/// Dataset that reshuffles the sample order for minibatch training.  Two
/// instances built with the same seed produce the same batches, which is what
/// population-parallel nodes need.
pub struct MinibatchDataset {
    /// The full dataset
    set: Arc<LabeledData>,
    /// Current sample order
    order: Vec<usize>,
    /// Samples per batch
    batch_size: usize,
    /// Number of epochs to keep an order for
    freeze: u32,
    /// Number of shuffles
    counter: u32,
    /// RNG for shuffling
    rng: XorShiftRng,
}

impl MinibatchDataset {
    /// New MinibatchDataset
    pub fn new(set: Arc<LabeledData>, batch_size: usize, freeze: u32, seed: u64) -> Self {
        MinibatchDataset {
            order: (0..set.len()).collect(),
            set: set,
            batch_size: batch_size,
            freeze: freeze.max(1),
            counter: 0,
            rng: XorShiftRng::seed_from_u64(seed),
        }
    }
}

impl Dataset for MinibatchDataset {
    fn shuffle(&mut self) -> bool {
        let updated = if self.counter % self.freeze == 0 {
            self.order.shuffle(&mut self.rng);
            true
        } else {
            false
        };
        self.counter = self.counter.wrapping_add(1);
        updated
    }

    fn data(&self) -> EagerIterator {
        self.set.batches(&self.order, self.batch_size)
    }

    fn all(&self) -> &LabeledData {
        &self.set
    }
}

impl Dataset for Box<dyn Dataset> {
    fn shuffle(&mut self) -> bool {
        (**self).shuffle()
    }

    fn data(&self) -> EagerIterator {
        (**self).data()
    }

    fn all(&self) -> &LabeledData {
        (**self).all()
    }
}
