//! Defines a fully connected neural network
use std::f32::consts::E;
use std::io::{Read, Write};

use rand::distributions::{Distribution, Normal};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use ne_core::model::{Model, Parameterized, SerDe};
use ne_data::datatypes::Matrix;
use ne_data::intrinsics::{dot, inplace_sum};

use super::{load_json, save_json, SerDeErr};

#[derive(Serialize, Deserialize, Clone, Debug, Copy, PartialEq)]
/// Defines the different types of functions between layers
pub enum NonLinearity {
    /// ReLu
    ReLu,

    /// Tanh
    Tanh,

    /// Linear. Note this isn't non-linear
    Linear,

    /// Sigmoid
    Sigmoid,

    /// ELU
    ELU,
}

impl NonLinearity {
    #[inline]
    /// Applies the specified function
    fn eval(&self, f: f32) -> f32 {
        use self::NonLinearity::*;
        match self {
            &ReLu => f.max(0f32),
            &Tanh => f.tanh(),
            &Sigmoid => 1. / (1. + E.powf(-f)),
            &Linear => f,
            &ELU => {
                if f > 0. {
                    f
                } else {
                    f.exp() - 1.
                }
            }
        }
    }
}

impl std::str::FromStr for NonLinearity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "relu" => Ok(NonLinearity::ReLu),
            "tanh" => Ok(NonLinearity::Tanh),
            "linear" | "identity" => Ok(NonLinearity::Linear),
            "sigmoid" => Ok(NonLinearity::Sigmoid),
            "elu" => Ok(NonLinearity::ELU),
            other => Err(format!("unknown non-linearity `{}`", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
/// Represents a layer of a neural network
struct Layer {
    /// Input width
    input_dim: usize,
    /// The weights of the layer, one row of `input_dim` values per unit
    w: Vec<f32>,
    /// The bias
    bias: Vec<f32>,
    /// The type of non-linearity to apply
    nl: NonLinearity,
}

impl Layer {
    /// Creates a new layer
    fn new(input_dim: usize, units: usize, nl: NonLinearity) -> Self {
        Layer {
            input_dim: input_dim,
            w: vec![0f32; input_dim * units],
            bias: vec![0f32; units],
            nl: nl,
        }
    }

    fn units(&self) -> usize {
        self.bias.len()
    }

    fn is_consistent(&self) -> bool {
        self.w.len() == self.input_dim * self.units()
    }

    /// Applies the weights, bias, and non-linearity to one sample
    fn eval(&self, payload: &[f32], output: &mut [f32]) -> () {
        for (i, row) in self.w.chunks(self.input_dim.max(1)).enumerate().take(self.units()) {
            output[i] = dot(row, payload);
        }

        inplace_sum(&mut output[0..self.units()], &self.bias);
        for o in output[0..self.units()].iter_mut() {
            *o = self.nl.eval(*o);
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
/// Representation of a full network
pub struct Network {
    /// All the layers
    layers: Vec<Layer>,
    /// Widest layer. Used to size the scratch buffers
    max_dim: usize,
}

impl Network {
    /// Zero initialized network.  `sizes` lists the width of every layer,
    /// the last one being the output; `nl` applies to all but the output.
    pub fn new(input_dim: usize, sizes: &[usize], nl: NonLinearity) -> Self {
        assert!(input_dim > 0, "input dimension must be positive");
        assert!(!sizes.is_empty(), "network needs at least one layer");
        sizes.iter().for_each(|d| assert!(*d > 0, "layer widths must be positive"));

        let mut input = input_dim;
        let mut layers = Vec::with_capacity(sizes.len());
        for (i, s) in sizes.iter().enumerate() {
            let lnl = if i + 1 == sizes.len() {
                NonLinearity::Linear
            } else {
                nl
            };
            layers.push(Layer::new(input, *s, lnl));
            input = *s;
        }

        let max_dim = sizes.iter().cloned().max().unwrap_or(0).max(input_dim);
        Network {
            layers: layers,
            max_dim: max_dim,
        }
    }

    /// Weights drawn from `N(0, 1/fan_in)`, biases at zero.  The same seed
    /// gives the same network on every node.
    pub fn with_seed(input_dim: usize, sizes: &[usize], nl: NonLinearity, seed: u64) -> Self {
        let mut network = Network::new(input_dim, sizes, nl);
        let mut rng = XorShiftRng::seed_from_u64(seed);
        for layer in network.layers.iter_mut() {
            let normal = Normal::new(0., (1. / layer.input_dim as f64).sqrt());
            for w in layer.w.iter_mut() {
                *w = normal.sample(&mut rng) as f32;
            }
        }
        network
    }

    /// Input dimension
    pub fn input_dim(&self) -> usize {
        self.layers[0].input_dim
    }

    /// Output dimension
    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].units()
    }

    /// Widths of every layer, output last
    pub fn sizes(&self) -> Vec<usize> {
        self.layers.iter().map(|l| l.units()).collect()
    }

    // Evaluates the network on one sample, ping-ponging between two buffers
    fn eval_row(&self, x: &[f32], a: &mut [f32], b: &mut [f32], out: &mut [f32]) {
        a[..x.len()].copy_from_slice(x);
        let mut width = x.len();
        for layer in self.layers.iter() {
            layer.eval(&a[..width], b);
            width = layer.units();
            a[..width].copy_from_slice(&b[..width]);
        }
        out.copy_from_slice(&a[..width]);
    }
}

impl Parameterized for Network {
    fn visit_parameters<F>(&self, f: &mut F) -> ()
    where
        F: FnMut(&[f32]),
    {
        for layer in self.layers.iter() {
            f(&layer.w);
            f(&layer.bias);
        }
    }

    fn visit_parameters_mut<F>(&mut self, f: &mut F) -> ()
    where
        F: FnMut(&mut [f32]),
    {
        for layer in self.layers.iter_mut() {
            f(&mut layer.w);
            f(&mut layer.bias);
        }
    }
}

impl Model for Network {
    type Input = Matrix;
    type Output = Matrix;

    fn forward(&self, input: &Matrix) -> Matrix {
        assert_eq!(input.cols(), self.input_dim(), "input has the wrong number of features");
        let mut out = Matrix::zeros(input.rows(), self.output_dim());
        let mut a = vec![0f32; self.max_dim];
        let mut b = vec![0f32; self.max_dim];
        for (i, x) in input.iter_rows().enumerate() {
            self.eval_row(x, &mut a, &mut b, out.row_mut(i));
        }
        out
    }
}

impl SerDe for Network {
    type Error = SerDeErr;

    fn save<A: Write>(&self, writer: &mut A) -> Result<(), Self::Error> {
        save_json(self, writer)
    }

    fn load<A: Read>(reader: &mut A) -> Result<Self, Self::Error> {
        let network: Network = load_json(reader)?;
        if network.layers.is_empty() {
            return Err(SerDeErr::Invalid("no layers".into()));
        }
        let mut input = network.layers[0].input_dim;
        for (i, layer) in network.layers.iter().enumerate() {
            if layer.input_dim != input || !layer.is_consistent() {
                return Err(SerDeErr::Invalid(format!("layer {} has inconsistent shapes", i)));
            }
            input = layer.units();
        }
        let widest = network.sizes().into_iter().max().unwrap_or(0).max(network.input_dim());
        if network.max_dim < widest {
            return Err(SerDeErr::Invalid(format!("scratch width {} below {}", network.max_dim, widest)));
        }
        Ok(network)
    }
}
