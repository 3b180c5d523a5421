//! Node topology and the collective synchronization primitive.
//!
//! The optimizers only ever talk to other nodes through `Environment::synchronize`,
//! and only once or twice per generation.  Everything else (noise, population
//! layout) is derived locally from the topology.

mod local;

pub use self::local::{LocalCluster, LocalNode};

use serde_derive::{Deserialize, Serialize};

use crate::error::{Result, ShapeError};

/// How a buffer is combined across nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Leave the buffer untouched
    None,
    /// All-reduce the whole buffer to its element-wise mean
    Average,
    /// All-gather: the buffer is split into one fold per node and every node
    /// receives every other node's fold
    Gather,
}

/// Read-only topology plus the collective operation.  `synchronize` is a
/// barrier: every node must call it, in the same order and with buffers of
/// the same length, before any of them returns.
pub trait Environment {
    /// Local rank in `0..number_of_nodes()`
    fn rank(&self) -> usize;

    /// Number of cooperating nodes
    fn number_of_nodes(&self) -> usize;

    /// Combines `buffer` across all nodes according to `mode`
    fn synchronize(&mut self, buffer: &mut [f32], mode: SyncMode) -> Result<()>;
}

/// Range of `len` owned by `rank` when split into `nodes` equal folds
pub fn fold_of(len: usize, nodes: usize, rank: usize) -> Result<std::ops::Range<usize>> {
    if nodes == 0 || len % nodes != 0 {
        return Err(ShapeError::UnevenFolds {
            len: len,
            nodes: nodes,
        }
        .into());
    }
    let fold = len / nodes;
    Ok(rank * fold..(rank + 1) * fold)
}

/// A lone node; every synchronization is the identity
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleNode;

impl Environment for SingleNode {
    fn rank(&self) -> usize {
        0
    }

    fn number_of_nodes(&self) -> usize {
        1
    }

    fn synchronize(&mut self, _buffer: &mut [f32], _mode: SyncMode) -> Result<()> {
        Ok(())
    }
}
