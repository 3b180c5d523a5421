//! Defines methods shared by the training binaries

use thiserror::Error;

/// Methods for reading arguments
pub mod args;
/// Methods for loading datasets and models
pub mod loaders;
/// Helper methods for scoring a model on held out data
pub mod tester;

/// Everything that can stop a training run
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A command line value could not be used
    #[error("invalid argument: {0}")]
    Args(String),

    /// The `--config` file is not valid settings JSON
    #[error("bad config file: {0}")]
    Config(#[from] serde_json::Error),

    /// File access failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A dataset could not be loaded
    #[error(transparent)]
    Load(#[from] ne_data::load::LoadError),

    /// A model could not be read or written
    #[error("model file: {0}")]
    Model(#[from] ne_models::SerDeErr),

    /// The optimizer failed
    #[error(transparent)]
    Engine(#[from] ne_core::Error),
}
