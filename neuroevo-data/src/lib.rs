//! Library for dataset methods
#![warn(missing_docs, unused)]

#[macro_use]
extern crate serde_derive;

/// Labeled datasets, minibatches and node shards
pub mod dataset;
/// Definitions of sparse vectors and dense matrices
pub mod datatypes;
/// Helper methods for vector math
pub mod intrinsics;
/// Defines methods for loading data from a file
pub mod load;
