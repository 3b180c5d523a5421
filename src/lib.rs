//! Neuroevo
//!
//! Neuroevo trains neural networks with evolutionary strategies.  This crate
//! holds the command line harness around the `ne_core` engine: argument
//! parsing, dataset and model loading, test scoring, and a small example.
#![warn(missing_docs, unused)]

/// Tools for binaries
pub mod bin_utils;
/// Example objectives
pub mod example;
