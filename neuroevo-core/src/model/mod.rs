//! Interfaces the optimizers need from a neural network and its loss.

mod adapter;

pub use self::adapter::ParameterAdapter;

use std::io::{Read, Write};

/// Exposes trainable parameter tensors in a fixed, stable order.  Both
/// visitors must walk the tensors in exactly the same order every time.
pub trait Parameterized {
    /// Visits each parameter tensor, flattened
    fn visit_parameters<F>(&self, f: &mut F) -> ()
    where
        F: FnMut(&[f32]);

    /// Visits each parameter tensor, flattened, allowing in-place writes
    fn visit_parameters_mut<F>(&mut self, f: &mut F) -> ()
    where
        F: FnMut(&mut [f32]);

    /// Total number of trainable scalars
    fn num_parameters(&self) -> usize {
        let mut n = 0;
        self.visit_parameters(&mut |p| n += p.len());
        n
    }
}

/// A model the optimizers can evaluate.  Cloning produces an independent
/// parameter store.
pub trait Model: Parameterized + Clone {
    /// Batch type fed to the forward pass
    type Input: ?Sized;
    /// Output of the forward pass, consumed by a `Criterion`
    type Output;

    /// Forward evaluation of a batch
    fn forward(&self, input: &Self::Input) -> Self::Output;
}

/// Loss function.  Lower is better.
pub trait Criterion<Output> {
    /// Targets the output is compared against
    type Target: ?Sized;

    /// Scalar loss of `output` against `target`
    fn loss(&self, output: &Output, target: &Self::Target) -> f32;
}

/// Serialization for models
pub trait SerDe: Sized {
    /// Error conditions due to writing
    type Error;

    /// Writes out a model to writer
    fn save<A: Write>(&self, writer: &mut A) -> Result<(), Self::Error>;

    /// Loads a model from a reader.  All necessary metadata should be
    /// stored within the model
    fn load<A: Read>(reader: &mut A) -> Result<Self, Self::Error>;
}
