//! Error conditions raised by the optimizers and their collaborators

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top level error
#[derive(Debug, Error)]
pub enum Error {
    /// The optimizer was built with an invalid combination of options
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Two buffers that should agree in size do not
    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    /// The environment failed to synchronize a buffer across nodes
    #[error("synchronization error: {0}")]
    Sync(#[from] SyncError),
}

/// Fatal configuration errors, raised when an optimizer is constructed
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Semi/orthogonal updates combined with data parallelism, or with each other
    #[error("{0} cannot be combined with {1}")]
    IncompatibleParallelism(&'static str, &'static str),

    /// Unknown noise distribution name
    #[error("unsupported noise distribution `{0}` (expected Gaussian or Uniform)")]
    UnsupportedDistribution(String),

    /// Unknown sampling strategy name
    #[error("unsupported sampling strategy `{0}` (expected Plain or Antithetic)")]
    UnsupportedSampling(String),

    /// Unknown optimizer name
    #[error("unsupported optimizer `{0}` (expected openai-es, snes or ga)")]
    UnsupportedOptimizer(String),

    /// The requested population cannot give every node at least one member
    #[error("population of {requested} cannot be split across {nodes} nodes")]
    PopulationTooSmall {
        /// Requested population
        requested: usize,
        /// Population-parallel nodes
        nodes: usize,
    },

    /// Mutation noise must cover full parameter rows
    #[error("layout {0:?} cannot be used to generate mutation noise")]
    InvalidMutateLayout(crate::noise::NoiseLayout),

    /// Rank does not exist in the topology
    #[error("rank {rank} is out of range for {nodes} nodes")]
    InvalidRank {
        /// Local rank
        rank: usize,
        /// Node count
        nodes: usize,
    },

    /// GA elite ratio selects nobody
    #[error("elite ratio {ratio} selects no elites from a population of {popsize}")]
    NoElites {
        /// Population size
        popsize: usize,
        /// Requested ratio
        ratio: f32,
    },

    /// A scalar setting is out of its valid range
    #[error("{name} must be {expected}, got {value}")]
    OutOfRange {
        /// Setting name
        name: &'static str,
        /// Human readable constraint
        expected: &'static str,
        /// Offending value
        value: f32,
    },

    /// The model exposes no trainable parameters
    #[error("model has no trainable parameters")]
    EmptyModel,
}

/// Dimension mismatches
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShapeError {
    /// Flat vector does not match the recorded parameter layout
    #[error("expected {expected} parameters, found {found}")]
    ParameterCount {
        /// Recorded at construction
        expected: usize,
        /// Seen now
        found: usize,
    },

    /// A parameter tensor changed size since construction
    #[error("parameter tensor {index} has {found} elements, expected {expected}")]
    ParameterLayout {
        /// Position of the tensor in traversal order
        index: usize,
        /// Recorded at construction
        expected: usize,
        /// Seen now
        found: usize,
    },

    /// A buffer cannot be split into equal folds
    #[error("length {len} cannot be split into {nodes} equal folds")]
    UnevenFolds {
        /// Buffer length
        len: usize,
        /// Node count
        nodes: usize,
    },

    /// Generic length mismatch between two operands
    #[error("{what}: expected length {expected}, found {found}")]
    Length {
        /// Operand description
        what: &'static str,
        /// Expected length
        expected: usize,
        /// Actual length
        found: usize,
    },
}

/// Failures of the synchronization backend
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// A peer panicked while holding the exchange
    #[error("exchange poisoned by a failed peer")]
    Poisoned,

    /// A peer left the cluster, by returning or panicking, while others
    /// still expected it to synchronize
    #[error("a peer left the cluster before synchronizing")]
    Abandoned,

    /// Peers contributed buffers of different lengths
    #[error("node {rank} contributed {found} values, expected {expected}")]
    Mismatch {
        /// Offending rank
        rank: usize,
        /// Expected length
        expected: usize,
        /// Contributed length
        found: usize,
    },
}
