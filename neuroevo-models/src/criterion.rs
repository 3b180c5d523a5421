//! Loss functions over batch outputs.  All losses are means over the batch,
//! so fold losses stay comparable across batch sizes.
use ne_core::model::Criterion;
use ne_data::datatypes::Matrix;
use ne_data::intrinsics::{argmax, log_sum_exp};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
/// Mean squared error against row-major targets
pub struct MeanSquaredError;

impl Criterion<Matrix> for MeanSquaredError {
    type Target = [f32];

    fn loss(&self, output: &Matrix, target: &[f32]) -> f32 {
        let out = output.as_slice();
        assert_eq!(out.len(), target.len(), "one target per output value");
        if out.is_empty() {
            return 0.;
        }
        let sse: f32 = out
            .iter()
            .zip(target.iter())
            .map(|(o, t)| (o - t) * (o - t))
            .sum();
        sse / out.len() as f32
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
/// Negative log likelihood of the log-softmax of each output row.  Targets
/// are class indices stored as floats.
pub struct NllLoss;

impl NllLoss {
    /// Loss of a single row of logits
    pub fn row_loss(logits: &[f32], label: usize) -> f32 {
        log_sum_exp(logits) - logits[label]
    }
}

impl Criterion<Matrix> for NllLoss {
    type Target = [f32];

    fn loss(&self, output: &Matrix, target: &[f32]) -> f32 {
        assert_eq!(output.rows(), target.len(), "one label per output row");
        if target.is_empty() {
            return 0.;
        }
        let total: f32 = output
            .iter_rows()
            .zip(target.iter())
            .map(|(logits, label)| {
                let label = *label as usize;
                assert!(label < logits.len(), "label {} out of range", label);
                NllLoss::row_loss(logits, label)
            })
            .sum();
        total / target.len() as f32
    }
}

/// Fraction of rows whose highest output is the labeled class
pub fn accuracy(output: &Matrix, labels: &[f32]) -> f32 {
    assert_eq!(output.rows(), labels.len(), "one label per output row");
    if labels.is_empty() {
        return 0.;
    }
    let correct = output
        .iter_rows()
        .zip(labels.iter())
        .filter(|(row, label)| argmax(row) == Some(**label as usize))
        .count();
    correct as f32 / labels.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mse() {
        let out = Matrix::from_rows(&[vec![1.], vec![3.]]).unwrap();
        assert_eq!(MeanSquaredError.loss(&out, &[1., 1.]), 2.);
        assert_eq!(MeanSquaredError.loss(&Matrix::zeros(0, 1), &[]), 0.);
    }

    #[test]
    fn test_nll() {
        // Uniform logits give ln(k)
        let out = Matrix::from_rows(&[vec![0., 0., 0., 0.]]).unwrap();
        assert!((NllLoss.loss(&out, &[2.]) - 4f32.ln()).abs() < 1e-5);

        // A confident, correct row is cheap; a confident, wrong one is not
        let out = Matrix::from_rows(&[vec![10., 0.], vec![10., 0.]]).unwrap();
        assert!(NllLoss.loss(&out, &[0., 0.]) < 1e-3);
        assert!(NllLoss.loss(&out, &[1., 1.]) > 9.);
    }

    #[test]
    fn test_accuracy() {
        let out = Matrix::from_rows(&[vec![0.1, 0.9], vec![0.8, 0.2], vec![0.3, 0.7]]).unwrap();
        assert!((accuracy(&out, &[1., 0., 0.]) - 2. / 3.).abs() < 1e-6);
    }
}
