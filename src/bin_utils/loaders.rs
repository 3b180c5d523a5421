use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::sync::Arc;

use log::info;

use ne_core::model::SerDe;
use ne_data::dataset::synthetic::blobs;
use ne_data::dataset::types::{DenseData, SparseData};
use ne_data::dataset::{Dataset, LabeledData, MinibatchDataset};
use ne_data::load::{read_csv, read_libsvm, LoadError};
use ne_models::SerDeErr;

use super::args::DatasetMeta;
use super::HarnessError;

/// Samples in the generated set when no training file is given
pub static SYNTHETIC_SAMPLES: usize = 2000;
/// Classes in the generated set
pub static SYNTHETIC_CLASSES: usize = 10;

fn read_file(meta: &DatasetMeta, path: &str) -> Result<LabeledData, LoadError> {
    if meta.csv {
        read_csv(path, 0, false)
    } else {
        match meta.dims {
            Some(d) => read_libsvm(&SparseData(d), path),
            None => read_libsvm(&DenseData, path),
        }
    }
}

/// Loads the training and test sets.  Without a test file the last
/// `holdout` fraction of the training set is used for testing.
pub fn load_datasets(
    meta: &DatasetMeta,
    seed: u64,
) -> Result<(Arc<LabeledData>, Arc<LabeledData>), HarnessError> {
    let now = std::time::Instant::now();
    let full = match &meta.fname {
        Some(path) => read_file(meta, path)?,
        None => {
            let dims = meta.dims.unwrap_or(20);
            info!(
                "no training file, generating {} samples of {} features in {} classes",
                SYNTHETIC_SAMPLES, dims, SYNTHETIC_CLASSES
            );
            blobs(SYNTHETIC_SAMPLES, dims, SYNTHETIC_CLASSES, 1.0, seed)
        }
    };

    let (train, test) = match &meta.tname {
        Some(path) => (full, read_file(meta, path)?),
        None => full.split(meta.holdout),
    };
    if train.is_empty() {
        return Err(LoadError::Empty.into());
    }
    if !test.is_empty() && test.dims() != train.dims() {
        return Err(LoadError::Shape {
            what: "test features",
            expected: train.dims(),
            found: test.dims(),
        }
        .into());
    }

    info!(
        "train: {} samples, test: {} samples, {} features, {} classes, loaded in {}ms",
        train.len(),
        test.len(),
        train.dims(),
        train.num_classes().max(test.num_classes()),
        now.elapsed().as_millis()
    );
    Ok((Arc::new(train), Arc::new(test)))
}

/// Batches one node trains on.  Data parallel nodes each get their own shard;
/// otherwise every node sees the same shuffled batches, which the population
/// parallel strategies require.
pub fn build_train_dataset(
    train: &Arc<LabeledData>,
    batch_size: usize,
    rank: usize,
    nodes: usize,
    data_parallel: bool,
    seed: u64,
) -> Box<dyn Dataset> {
    let set = if data_parallel && nodes > 1 {
        Arc::new(train.shard(rank, nodes))
    } else {
        train.clone()
    };
    Box::new(MinibatchDataset::new(set, batch_size, 1, seed))
}

/// Loads a model written by `write_model`
pub fn load_model<M: SerDe<Error = SerDeErr>>(path: &str) -> Result<M, HarnessError> {
    info!("loading model from {}", path);
    let mut reader = BufReader::new(File::open(path)?);
    Ok(M::load(&mut reader)?)
}

/// Write out the model to disk
pub fn write_model<M: SerDe<Error = SerDeErr>>(model: &M, path: &str) -> Result<(), HarnessError> {
    info!("writing model to {}", path);
    let mut writer = BufWriter::new(File::create(path)?);
    model.save(&mut writer)?;
    writer.flush()?;
    Ok(())
}
