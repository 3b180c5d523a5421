//! First-order update rules.
//!
//! OpenAI-ES turns its search gradient into a loss gradient and hands it to one
//! of these, exactly as a backprop loop would.

use serde_derive::{Deserialize, Serialize};

use crate::error::{Result, ShapeError};

/// Applies one update to `params` given the loss gradient `grad`
pub trait UpdateRule: Send {
    /// Performs a single step
    fn step(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()>;
}

fn check(params: &[f32], grad: &[f32]) -> Result<()> {
    if params.len() != grad.len() {
        return Err(ShapeError::Length {
            what: "gradient",
            expected: params.len(),
            found: grad.len(),
        }
        .into());
    }
    Ok(())
}

/// Stochastic gradient descent, with optional momentum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sgd {
    /// Learning rate
    pub lr: f32,
    /// Momentum factor; `0` disables it
    pub momentum: f32,
    #[serde(skip)]
    velocity: Vec<f32>,
}

impl Sgd {
    /// Plain SGD
    pub fn new(lr: f32) -> Self {
        Sgd::with_momentum(lr, 0.)
    }

    /// SGD with momentum
    pub fn with_momentum(lr: f32, momentum: f32) -> Self {
        Sgd {
            lr: lr,
            momentum: momentum,
            velocity: Vec::new(),
        }
    }
}

impl UpdateRule for Sgd {
    fn step(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        check(params, grad)?;
        if self.momentum == 0. {
            for (p, g) in params.iter_mut().zip(grad) {
                *p -= self.lr * g;
            }
            return Ok(());
        }

        if self.velocity.len() != params.len() {
            self.velocity = vec![0f32; params.len()];
        }
        for ((p, g), v) in params.iter_mut().zip(grad).zip(self.velocity.iter_mut()) {
            *v = self.momentum * *v + g;
            *p -= self.lr * *v;
        }
        Ok(())
    }
}

/// Adam (Kingma & Ba)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    /// Learning rate
    pub lr: f32,
    /// Decay of the first moment
    pub beta1: f32,
    /// Decay of the second moment
    pub beta2: f32,
    /// Added to the denominator
    pub eps: f32,
    #[serde(skip)]
    t: i32,
    #[serde(skip)]
    m: Vec<f32>,
    #[serde(skip)]
    v: Vec<f32>,
}

impl Adam {
    /// Adam with the usual defaults
    pub fn new(lr: f32) -> Self {
        Adam {
            lr: lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }
}

impl UpdateRule for Adam {
    fn step(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        check(params, grad)?;
        if self.m.len() != params.len() {
            self.m = vec![0f32; params.len()];
            self.v = vec![0f32; params.len()];
            self.t = 0;
        }

        self.t += 1;
        let bc1 = 1. - self.beta1.powi(self.t);
        let bc2 = 1. - self.beta2.powi(self.t);
        for i in 0..params.len() {
            let g = grad[i];
            self.m[i] = self.beta1 * self.m[i] + (1. - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1. - self.beta2) * g * g;
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            params[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sgd() {
        let mut sgd = Sgd::new(0.5);
        let mut p = vec![1., -1.];
        sgd.step(&mut p, &[2., -2.]).unwrap();
        assert_eq!(p, vec![0., 0.]);
        assert!(sgd.step(&mut p, &[1.]).is_err());
    }

    #[test]
    fn test_momentum() {
        let mut sgd = Sgd::with_momentum(1., 0.5);
        let mut p = vec![0.];
        sgd.step(&mut p, &[1.]).unwrap();
        sgd.step(&mut p, &[1.]).unwrap();
        // v = 1 then 1.5
        assert_eq!(p, vec![-2.5]);
    }

    #[test]
    fn test_adam_first_step() {
        // The first bias corrected Adam step has magnitude ~lr regardless of scale
        let mut adam = Adam::new(0.1);
        let mut p = vec![0., 0.];
        adam.step(&mut p, &[1000., -0.001]).unwrap();
        assert!((p[0] + 0.1).abs() < 1e-4);
        assert!((p[1] - 0.1).abs() < 1e-3);
    }
}
