use ne_core::model::{Criterion, Model};
use ne_data::dataset::LabeledData;
use ne_data::datatypes::Matrix;
use ne_models::{accuracy, NllLoss};

/// Scores of a model on a labeled set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestReport {
    /// Mean negative log likelihood per sample
    pub loss: f32,
    /// Fraction of samples classified correctly
    pub accuracy: f32,
    /// Number of samples scored
    pub samples: usize,
}

/// Evaluates a classifier on `data` in batches of `batch_size` samples
pub fn evaluate_test_data<M>(model: &M, data: &LabeledData, batch_size: usize) -> TestReport
where
    M: Model<Input = Matrix, Output = Matrix>,
{
    let indices: Vec<usize> = (0..data.len()).collect();
    let mut loss = 0f32;
    let mut correct = 0f32;
    for chunk in indices.chunks(batch_size.max(1)) {
        let batch = data.batch(chunk);
        let output = model.forward(&batch.x);
        let n = batch.len() as f32;
        loss += NllLoss.loss(&output, &batch.y[..]) * n;
        correct += accuracy(&output, &batch.y) * n;
    }

    let samples = data.len();
    let denom = samples.max(1) as f32;
    TestReport {
        loss: loss / denom,
        accuracy: correct / denom,
        samples: samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ne_core::model::Parameterized;
    use ne_data::dataset::synthetic::blobs;
    use ne_models::Linear;

    #[test]
    fn test_batching_does_not_change_scores() {
        let data = blobs(50, 3, 4, 0.5, 2);
        let model = Linear::with_seed(3, 4, 5);
        let a = evaluate_test_data(&model, &data, 7);
        let b = evaluate_test_data(&model, &data, 1000);
        assert_eq!(a.samples, 50);
        assert!((a.loss - b.loss).abs() < 1e-4);
        assert!((a.accuracy - b.accuracy).abs() < 1e-6);
    }

    #[test]
    fn test_zero_model_is_uniform() {
        let data = blobs(12, 2, 3, 0.5, 2);
        let model = Linear::new(2, 3);
        assert_eq!(model.num_parameters(), 9);
        let report = evaluate_test_data(&model, &data, 5);
        assert!((report.loss - 3f32.ln()).abs() < 1e-5);
    }
}
