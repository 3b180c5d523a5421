//! Example objectives over a two dimensional point, for trying the
//! optimizers without any data.
use std::f64;

use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use ne_core::model::{Criterion, Model, Parameterized};
use ne_core::update::Sgd;
use ne_core::{EsSettings, GaSettings, Optimizer, Result, SingleNode, SnesSettings};

#[derive(Clone, Debug, Copy, PartialEq)]
/// Model state
pub struct Pair(pub [f32; 2]);

impl Pair {
    /// Uniformly random start in `[-range, range)²`
    pub fn random(range: f32, seed: u64) -> Self {
        let uniform = Uniform::new(-range, range);
        let mut rng = XorShiftRng::seed_from_u64(seed);
        Pair([uniform.sample(&mut rng), uniform.sample(&mut rng)])
    }
}

impl Parameterized for Pair {
    fn visit_parameters<F>(&self, f: &mut F) -> ()
    where
        F: FnMut(&[f32]),
    {
        f(&self.0)
    }

    fn visit_parameters_mut<F>(&mut self, f: &mut F) -> ()
    where
        F: FnMut(&mut [f32]),
    {
        f(&mut self.0)
    }
}

impl Model for Pair {
    type Input = ();
    type Output = (f32, f32);

    fn forward(&self, _input: &()) -> (f32, f32) {
        (self.0[0], self.0[1])
    }
}

/// Matyas function; a flat, elongated bowl with its minimum 0 at the origin
pub struct Matyas;

impl Criterion<(f32, f32)> for Matyas {
    type Target = ();

    fn loss(&self, state: &(f32, f32), _target: &()) -> f32 {
        let (x, y) = *state;
        0.26 * (x.powi(2) + y.powi(2)) - 0.48 * x * y
    }
}

/// Ackley function; many local minima around a global minimum 0 at the origin
pub struct Ackley;

impl Criterion<(f32, f32)> for Ackley {
    type Target = ();

    fn loss(&self, state: &(f32, f32), _target: &()) -> f32 {
        let (x64, y64) = (state.0 as f64, state.1 as f64);
        let ack = -20. * (-0.2 * (0.5 * (x64.powi(2) + y64.powi(2))).sqrt()).exp()
            - (0.5 * ((2. * f64::consts::PI * x64).cos() + (2. * f64::consts::PI * y64).cos())).exp()
            + f64::consts::E
            + 20.;
        ack as f32
    }
}

/// Which optimizer drives the example
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExampleOpt {
    /// OpenAI-ES with SGD
    OpenAiEs,
    /// SNES
    Snes,
    /// Genetic algorithm
    Genetic,
}

/// Minimizes `criterion` from `init` for `generations` generations on a
/// single node.  Returns the final loss and the best point.
pub fn run_example<C>(
    opt: ExampleOpt,
    criterion: C,
    init: Pair,
    generations: usize,
    seed: u64,
) -> Result<(f32, Pair)>
where
    C: Criterion<(f32, f32), Target = ()>,
{
    let mut optimizer = match opt {
        ExampleOpt::OpenAiEs => {
            let settings = EsSettings {
                popsize: 50,
                sigma: 0.1,
                seed: seed,
                ..EsSettings::default()
            };
            Optimizer::openai_es(SingleNode, init, criterion, Box::new(Sgd::new(0.02)), &settings)?
        }
        ExampleOpt::Snes => {
            let settings = SnesSettings {
                es: EsSettings {
                    popsize: 50,
                    sigma: 1.0,
                    seed: seed,
                    ..EsSettings::default()
                },
                lr_theta: 1.0,
                ..SnesSettings::default()
            };
            Optimizer::snes(SingleNode, init, criterion, &settings)?
        }
        ExampleOpt::Genetic => {
            let settings = GaSettings {
                popsize: 50,
                sigma: 0.1,
                seed: seed,
                ..GaSettings::default()
            };
            Optimizer::genetic(SingleNode, init, criterion, &settings)?
        }
    };

    for _ in 0..generations {
        optimizer.step(&(), &())?;
    }
    optimizer.eval_theta(&(), &())?;
    Ok((optimizer.loss(), optimizer.best_model()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objectives() {
        assert_eq!(Matyas.loss(&(0., 0.), &()), 0.);
        assert!(Matyas.loss(&(1., -1.), &()) > 0.);
        assert!(Ackley.loss(&(0., 0.), &()).abs() < 1e-5);
        assert!(Ackley.loss(&(0.5, 0.5), &()) > 1.);
    }

    #[test]
    fn test_openai_es_descends_matyas() {
        let init = Pair([3., -2.]);
        let start = Matyas.loss(&init.forward(&()), &());
        let (loss, _) = run_example(ExampleOpt::OpenAiEs, Matyas, init, 200, 1).unwrap();
        assert!(loss < start * 0.5);
    }

    #[test]
    fn test_ga_keeps_best() {
        let init = Pair::random(5., 3);
        let start = Matyas.loss(&init.forward(&()), &());
        let (loss, best) = run_example(ExampleOpt::Genetic, Matyas, init, 30, 3).unwrap();
        assert!(loss <= start);
        assert_eq!(loss, Matyas.loss(&best.forward(&()), &()));
    }
}
