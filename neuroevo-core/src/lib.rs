//! Neuroevo-Core
//! ===
//!
//! Population based, gradient free training of neural network parameters,
//! distributed across the nodes of an `Environment`.  Out of the box it
//! contains three optimizers behind a single driver: OpenAI-ES, SNES, and a
//! genetic algorithm.
//!
//! Every optimizer runs the same generational loop: perturb a central
//! parameter vector (theta) into a population, evaluate each member's loss,
//! synchronize the fitness vector across nodes, and move theta.
//!
//! OpenAI-ES
//! ---
//! Finite difference gradient estimates (Salimans et al.) from rank shaped
//! fitness, applied through an external `UpdateRule` such as `Adam`.  Work can
//! be split by population, by data, by semi-updates, or by orthogonal
//! gradient shards.
//!
//! Separable NES
//! ---
//! Natural gradient updates of theta and of a per-parameter sigma, using the
//! NES utility function (Wierstra et al.).
//!
//! Genetic Algorithm
//! ---
//! Truncation selection with elitism, uniform crossover and Gaussian mutation
//! over an explicit population table.
//!
//! Noise
//! ---
//! Perturbations are never stored or exchanged.  They are a pure function of
//! seed, generation, row and column block, so any node can rebuild any part
//! of the noise matrix on its own.

#![warn(missing_docs, unused)]

/// Error types shared by the crate
pub mod error;

/// Centered and normalized rank transforms
pub mod fitness;

/// Deterministic, sliceable perturbation noise
pub mod noise;

/// Node topology and buffer synchronization
pub mod environment;

/// Defines the interfaces for Model types for use in neuro-evolution optimizers.
pub mod model;

/// First-order rules applying a gradient to a flat parameter vector
pub mod update;

/// The shared generational driver
pub mod optimizer;

/// OpenAI-ES
pub mod openai;

/// Separable natural evolution strategy
pub mod snes;

/// Genetic algorithm
pub mod genetic;

pub use crate::environment::{Environment, LocalCluster, SingleNode, SyncMode};
pub use crate::error::{Error, Result};
pub use crate::genetic::GaSettings;
pub use crate::model::{Criterion, Model, Parameterized};
pub use crate::openai::EsSettings;
pub use crate::optimizer::{Optimizer, Phase};
pub use crate::snes::SnesSettings;
