//! Load
//! ---
//!
//! This defines the methods to read labeled data from libsvm and CSV files
use rayon::prelude::*;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::info;
use thiserror::Error;

use super::dataset::types::DataParse;
use super::dataset::LabeledData;
use super::datatypes::Matrix;

/// Failures while reading a dataset
#[derive(Debug, Error)]
pub enum LoadError {
    /// Underlying IO failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A line could not be parsed
    #[error("line {line}: {reason}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// What was wrong
        reason: String,
    },

    /// Lengths that should agree do not
    #[error("{what}: expected {expected}, found {found}")]
    Shape {
        /// What was measured
        what: &'static str,
        /// Expected length
        expected: usize,
        /// Actual length
        found: usize,
    },

    /// The file held no samples
    #[error("no samples found")]
    Empty,
}

/// Given a line from a libsvm file, outputs the label and the vector.  Lines
/// that are blank or only a comment yield `Ok(None)`.
pub fn parse_line<F: DataParse>(f: &F, line: &str) -> Result<Option<(f32, Vec<f32>)>, String> {
    // Remove comments
    let line = line.split('#').next().unwrap_or("");
    let mut pieces = line.trim().split_whitespace().peekable();
    let label = match pieces.next() {
        None => return Ok(None),
        Some(l) => l.parse().map_err(|_| format!("bad label `{}`", l))?,
    };
    // Optional group id, ignored
    if pieces.peek().map(|p| p.starts_with("qid:")).unwrap_or(false) {
        pieces.next();
    }

    match f.parse(pieces) {
        Some(x) => Ok(Some((label, x))),
        None => Err("bad feature".into()),
    }
}

/// Hard code buffersize for now
static BUFFER_SIZE: usize = 1000;

// Parses a file in buffers of lines, each buffer in parallel
fn read_lines<P, T, F>(path: P, skip: usize, parse: F) -> Result<Vec<T>, LoadError>
where
    P: AsRef<Path>,
    T: Send,
    F: Fn(&str) -> Result<Option<T>, String> + Sync,
{
    let br = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    let mut buffer = Vec::with_capacity(BUFFER_SIZE);
    let mut tmp_results = Vec::with_capacity(BUFFER_SIZE);
    let mut it = br.lines().enumerate().skip(skip);
    loop {
        buffer.clear();
        for _ in 0..BUFFER_SIZE {
            if let Some((n, line)) = it.next() {
                buffer.push((n + 1, line?));
            }
        }
        if buffer.len() == 0 {
            break;
        }

        tmp_results.clear();
        // Parse in parallel
        buffer
            .par_iter()
            .map(|(n, l)| parse(l).map_err(|reason| (*n, reason)))
            .collect_into_vec(&mut tmp_results);

        for res in tmp_results.drain(..) {
            match res {
                Ok(Some(v)) => out.push(v),
                Ok(None) => {}
                Err((line, reason)) => {
                    return Err(LoadError::Parse {
                        line: line,
                        reason: reason,
                    })
                }
            }
        }
    }
    Ok(out)
}

fn to_labeled(rows: Vec<(f32, Vec<f32>)>) -> Result<LabeledData, LoadError> {
    let dims = match rows.first() {
        Some((_, x)) => x.len(),
        None => return Err(LoadError::Empty),
    };
    let mut data = Vec::with_capacity(rows.len() * dims);
    let mut y = Vec::with_capacity(rows.len());
    for (label, x) in rows {
        if x.len() != dims {
            return Err(LoadError::Shape {
                what: "features",
                expected: dims,
                found: x.len(),
            });
        }
        data.extend_from_slice(&x);
        y.push(label);
    }
    let x = Matrix::new(y.len(), dims, data).ok_or(LoadError::Shape {
        what: "matrix",
        expected: y.len() * dims,
        found: 0,
    })?;
    LabeledData::new(x, y)
}

/// Given a file path, loads a libsvm file (`label [qid:..] idx:value ...`)
pub fn read_libsvm<F: DataParse, P: AsRef<Path>>(fmt: &F, path: P) -> Result<LabeledData, LoadError> {
    let display = path.as_ref().display().to_string();
    let rows = read_lines(path, 0, |l| parse_line(fmt, l))?;
    let data = to_labeled(rows)?;
    info!("loaded {} samples with {} features from {}", data.len(), data.dims(), display);
    Ok(data)
}

/// Loads a comma separated file of numbers, taking the label from
/// `label_column` and every other column as a feature
pub fn read_csv<P: AsRef<Path>>(path: P, label_column: usize, has_header: bool) -> Result<LabeledData, LoadError> {
    let skip = if has_header { 1 } else { 0 };
    let rows = read_lines(path, skip, |l| {
        if l.trim().is_empty() {
            return Ok(None);
        }
        let values: Result<Vec<f32>, String> = l
            .split(',')
            .map(|v| v.trim().parse().map_err(|_| format!("bad value `{}`", v.trim())))
            .collect();
        let mut values = values?;
        if label_column >= values.len() {
            return Err(format!("no column {}", label_column));
        }
        let label = values.remove(label_column);
        Ok(Some((label, values)))
    })?;
    let data = to_labeled(rows)?;
    info!("loaded {} samples with {} features", data.len(), data.dims());
    Ok(data)
}
