#![allow(dead_code)]

use ne_core::model::{Criterion, Model, Parameterized};

/// A bare parameter vector; the forward pass returns the parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub x: Vec<f32>,
}

impl Point {
    pub fn new(x: &[f32]) -> Self {
        Point { x: x.to_vec() }
    }
}

impl Parameterized for Point {
    fn visit_parameters<F>(&self, f: &mut F) -> ()
    where
        F: FnMut(&[f32]),
    {
        f(&self.x)
    }

    fn visit_parameters_mut<F>(&mut self, f: &mut F) -> ()
    where
        F: FnMut(&mut [f32]),
    {
        f(&mut self.x)
    }
}

impl Model for Point {
    type Input = ();
    type Output = Vec<f32>;

    fn forward(&self, _input: &()) -> Vec<f32> {
        self.x.clone()
    }
}

/// Squared distance to the target
pub struct Distance;

impl Criterion<Vec<f32>> for Distance {
    type Target = [f32];

    fn loss(&self, output: &Vec<f32>, target: &[f32]) -> f32 {
        output.iter().zip(target).map(|(o, t)| (o - t) * (o - t)).sum()
    }
}

/// `-c · x`, so ranks are a linear function of the perturbation
pub struct Linear;

impl Criterion<Vec<f32>> for Linear {
    type Target = [f32];

    fn loss(&self, output: &Vec<f32>, target: &[f32]) -> f32 {
        -output.iter().zip(target).map(|(o, c)| o * c).sum::<f32>()
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
