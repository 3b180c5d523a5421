//! Reference models and loss functions for the optimizers in `ne_core`.
//!
//! Models consume a batch as a `Matrix` with one sample per row and produce a
//! `Matrix` with one output row per sample.
#![warn(missing_docs, unused)]

#[macro_use]
extern crate serde_derive;

use std::io::{Read, Write};

use thiserror::Error;

/// Loss functions and metrics
pub mod criterion;
/// Defines linear models
pub mod linear;
/// Defines neural networks
pub mod nn;

pub use crate::criterion::{accuracy, MeanSquaredError, NllLoss};
pub use crate::linear::Linear;
pub use crate::nn::{Network, NonLinearity};

#[derive(Debug, Error)]
/// Error conditions due to reading or writing a model
pub enum SerDeErr {
    /// Error when reading or writing the json, including IO failures
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The stored model is internally inconsistent
    #[error("invalid model: {0}")]
    Invalid(String),
}

// Shared JSON plumbing for the models in this crate
fn save_json<T: serde::Serialize, A: Write>(model: &T, writer: &mut A) -> Result<(), SerDeErr> {
    serde_json::to_writer(writer, model)?;
    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned, A: Read>(reader: &mut A) -> Result<T, SerDeErr> {
    Ok(serde_json::from_reader(reader)?)
}
