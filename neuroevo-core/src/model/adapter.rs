//! Flat vector <-> model parameter marshalling

use super::Parameterized;
use crate::error::{Result, ShapeError};

/// Records a model's parameter layout once and then moves values between the
/// model and a flat vector, always in the model's traversal order.  Any later
/// change in that layout is reported as a shape error.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterAdapter {
    sizes: Vec<usize>,
    total: usize,
}

impl ParameterAdapter {
    /// Records the layout of `model`
    pub fn new<P: Parameterized>(model: &P) -> Self {
        let mut sizes = Vec::new();
        model.visit_parameters(&mut |p| sizes.push(p.len()));
        let total = sizes.iter().sum();
        ParameterAdapter {
            sizes: sizes,
            total: total,
        }
    }

    /// Length of the flat vector
    pub fn num_parameters(&self) -> usize {
        self.total
    }

    /// Number of parameter tensors
    pub fn num_tensors(&self) -> usize {
        self.sizes.len()
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.total {
            return Err(ShapeError::ParameterCount {
                expected: self.total,
                found: len,
            }
            .into());
        }
        Ok(())
    }

    /// Copies the model's parameters into `out`
    pub fn flatten<P: Parameterized>(&self, model: &P, out: &mut [f32]) -> Result<()> {
        self.check_len(out.len())?;
        let mut idx = 0;
        let mut tensor = 0;
        let mut err = None;
        model.visit_parameters(&mut |p| {
            if err.is_some() {
                return;
            }
            match self.sizes.get(tensor) {
                Some(&size) if size == p.len() && idx + size <= out.len() => {
                    out[idx..idx + size].copy_from_slice(p);
                    idx += size;
                }
                expected => {
                    err = Some(ShapeError::ParameterLayout {
                        index: tensor,
                        expected: expected.cloned().unwrap_or(0),
                        found: p.len(),
                    });
                }
            }
            tensor += 1;
        });
        self.finish(err, tensor)
    }

    /// Allocates a new flat vector from the model
    pub fn to_vec<P: Parameterized>(&self, model: &P) -> Result<Vec<f32>> {
        let mut v = vec![0f32; self.total];
        self.flatten(model, &mut v)?;
        Ok(v)
    }

    /// Overwrites the model's parameters with `values`
    pub fn unflatten<P: Parameterized>(&self, values: &[f32], model: &mut P) -> Result<()> {
        self.check_len(values.len())?;
        let mut idx = 0;
        let mut tensor = 0;
        let mut err = None;
        model.visit_parameters_mut(&mut |p| {
            if err.is_some() {
                return;
            }
            match self.sizes.get(tensor) {
                Some(&size) if size == p.len() && idx + size <= values.len() => {
                    p.copy_from_slice(&values[idx..idx + size]);
                    idx += size;
                }
                expected => {
                    err = Some(ShapeError::ParameterLayout {
                        index: tensor,
                        expected: expected.cloned().unwrap_or(0),
                        found: p.len(),
                    });
                }
            }
            tensor += 1;
        });
        self.finish(err, tensor)
    }

    fn finish(&self, err: Option<ShapeError>, visited: usize) -> Result<()> {
        if let Some(e) = err {
            return Err(e.into());
        }
        if visited != self.sizes.len() {
            return Err(ShapeError::Length {
                what: "parameter tensors",
                expected: self.sizes.len(),
                found: visited,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct TwoTensors {
        w: Vec<f32>,
        b: Vec<f32>,
    }

    impl Parameterized for TwoTensors {
        fn visit_parameters<F: FnMut(&[f32])>(&self, f: &mut F) {
            f(&self.w);
            f(&self.b);
        }

        fn visit_parameters_mut<F: FnMut(&mut [f32])>(&mut self, f: &mut F) {
            f(&mut self.w);
            f(&mut self.b);
        }
    }

    #[test]
    fn test_round_trip() {
        let mut model = TwoTensors {
            w: vec![1., 2., 3.],
            b: vec![4.],
        };
        let adapter = ParameterAdapter::new(&model);
        assert_eq!(adapter.num_parameters(), 4);
        assert_eq!(adapter.num_tensors(), 2);
        assert_eq!(adapter.to_vec(&model).unwrap(), vec![1., 2., 3., 4.]);

        let theta = vec![-0.5, 0.25, 8., 9.];
        adapter.unflatten(&theta, &mut model).unwrap();
        assert_eq!(model.w, vec![-0.5, 0.25, 8.]);
        assert_eq!(model.b, vec![9.]);
        assert_eq!(adapter.to_vec(&model).unwrap(), theta);
    }

    #[test]
    fn test_drift() {
        let mut model = TwoTensors {
            w: vec![1., 2., 3.],
            b: vec![4.],
        };
        let adapter = ParameterAdapter::new(&model);
        assert!(adapter.unflatten(&[1., 2.], &mut model).is_err());

        model.w.push(5.);
        model.b.clear();
        assert!(adapter.to_vec(&model).is_err());
        assert!(adapter.unflatten(&[0.; 4], &mut model).is_err());
    }
}
