//! Defines an affine model `y = W x + b`
use std::io::{Read, Write};

use rand::distributions::{Distribution, Normal};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use ne_core::model::{Model, Parameterized, SerDe};
use ne_data::datatypes::Matrix;
use ne_data::intrinsics::dot;

use super::{load_json, save_json, SerDeErr};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
/// Affine map from `dims` inputs to `outputs` outputs
pub struct Linear {
    /// Input dimension
    dims: usize,
    /// Output dimension
    outputs: usize,
    /// Weights, one row of `dims` values per output
    w: Vec<f32>,
    /// Bias, one per output
    bias: Vec<f32>,
}

impl Linear {
    /// Creates a zero initialized model
    pub fn new(dims: usize, outputs: usize) -> Self {
        assert!(dims > 0 && outputs > 0, "linear model needs non-zero dimensions");
        Linear {
            dims: dims,
            outputs: outputs,
            w: vec![0f32; dims * outputs],
            bias: vec![0f32; outputs],
        }
    }

    /// Weights drawn from `N(0, 1/dims)`, bias at zero
    pub fn with_seed(dims: usize, outputs: usize, seed: u64) -> Self {
        let mut model = Linear::new(dims, outputs);
        let mut rng = XorShiftRng::seed_from_u64(seed);
        let normal = Normal::new(0., (1. / dims as f64).sqrt());
        for w in model.w.iter_mut() {
            *w = normal.sample(&mut rng) as f32;
        }
        model
    }

    /// Input dimension
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Output dimension
    pub fn outputs(&self) -> usize {
        self.outputs
    }

    /// Weights of output `o`
    pub fn weights(&self, o: usize) -> &[f32] {
        &self.w[o * self.dims..(o + 1) * self.dims]
    }

    /// Bias vector
    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    /// Writes `W x + b` for a single sample into `out`
    pub fn eval_row(&self, x: &[f32], out: &mut [f32]) -> () {
        for o in 0..self.outputs {
            out[o] = dot(self.weights(o), x) + self.bias[o];
        }
    }
}

impl Parameterized for Linear {
    fn visit_parameters<F>(&self, f: &mut F) -> ()
    where
        F: FnMut(&[f32]),
    {
        f(&self.w);
        f(&self.bias);
    }

    fn visit_parameters_mut<F>(&mut self, f: &mut F) -> ()
    where
        F: FnMut(&mut [f32]),
    {
        f(&mut self.w);
        f(&mut self.bias);
    }
}

impl Model for Linear {
    type Input = Matrix;
    type Output = Matrix;

    fn forward(&self, input: &Matrix) -> Matrix {
        assert_eq!(input.cols(), self.dims, "input has the wrong number of features");
        let mut out = Matrix::zeros(input.rows(), self.outputs);
        for (i, x) in input.iter_rows().enumerate() {
            self.eval_row(x, out.row_mut(i));
        }
        out
    }
}

impl SerDe for Linear {
    type Error = SerDeErr;

    fn save<A: Write>(&self, writer: &mut A) -> Result<(), Self::Error> {
        save_json(self, writer)
    }

    fn load<A: Read>(reader: &mut A) -> Result<Self, Self::Error> {
        let model: Linear = load_json(reader)?;
        if model.w.len() != model.dims * model.outputs || model.bias.len() != model.outputs {
            return Err(SerDeErr::Invalid(format!(
                "expected {}x{} weights and {} biases",
                model.outputs, model.dims, model.outputs
            )));
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criterion::MeanSquaredError;
    use ne_core::model::Criterion;
    use ne_core::update::Adam;
    use ne_core::{EsSettings, Optimizer, SingleNode};
    use ne_data::dataset::synthetic;

    #[test]
    fn test_forward() {
        let mut model = Linear::new(2, 2);
        let mut next = 0.;
        model.visit_parameters_mut(&mut |p| {
            for v in p.iter_mut() {
                next += 1.;
                *v = next;
            }
        });
        // w = [[1, 2], [3, 4]], b = [5, 6]
        let x = Matrix::from_rows(&[vec![1., 0.], vec![1., 1.]]).unwrap();
        let y = model.forward(&x);
        assert_eq!(y.row(0), &[6., 9.]);
        assert_eq!(y.row(1), &[8., 13.]);
        assert_eq!(model.num_parameters(), 6);
    }

    #[test]
    fn test_seeded_init() {
        assert_eq!(Linear::with_seed(4, 3, 1), Linear::with_seed(4, 3, 1));
        assert!(Linear::with_seed(4, 3, 1) != Linear::with_seed(4, 3, 2));
        assert!(Linear::with_seed(4, 3, 1).bias().iter().all(|b| *b == 0.));
    }

    #[test]
    fn test_serde() {
        let model = Linear::with_seed(3, 2, 7);
        let mut buf = Vec::new();
        model.save(&mut buf).unwrap();
        let loaded = Linear::load(&mut buf.as_slice()).unwrap();
        assert_eq!(model, loaded);

        let bad = br#"{"dims":2,"outputs":1,"w":[1.0],"bias":[0.0]}"#;
        match Linear::load(&mut &bad[..]) {
            Err(SerDeErr::Invalid(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fits_linear_regression() {
        let (data, w, b) = synthetic::linear(200, 3, 0., 17);
        let settings = EsSettings {
            popsize: 50,
            sigma: 0.05,
            seed: 3,
            ..EsSettings::default()
        };
        let mut opt = Optimizer::openai_es(
            SingleNode,
            Linear::new(3, 1),
            MeanSquaredError,
            Box::new(Adam::new(0.05)),
            &settings,
        )
        .unwrap();

        let start = MeanSquaredError.loss(&Linear::new(3, 1).forward(data.x()), data.y());
        for _ in 0..300 {
            opt.step(data.x(), data.y()).unwrap();
        }
        opt.eval_theta(data.x(), data.y()).unwrap();
        assert!(opt.loss() < 0.1 * start, "loss {} from {}", opt.loss(), start);

        let fitted = opt.best_model().unwrap();
        for (found, expected) in fitted.weights(0).iter().zip(w.iter()) {
            assert!((found - expected).abs() < 0.3);
        }
        assert!((fitted.bias()[0] - b).abs() < 0.3);
    }
}
