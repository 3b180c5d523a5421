//! Genetic algorithm with elitism
//!
//! The population is an explicit row-major table.  Every generation keeps
//! the `num_elites` best members unchanged and refills the rest by uniform
//! crossover of two random elites followed by Gaussian mutation.

use float_ord::FloatOrd;
use log::debug;
use rand::distributions::{Distribution, Normal, Uniform};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use serde_derive::{Deserialize, Serialize};

use crate::environment::Environment;
use crate::error::{ConfigError, Result};
use crate::model::{Criterion, Model};
use crate::noise::block_seed;
use crate::optimizer::{Generational, Workspace};

// Row index reserved for the population stream, never a real noise row
const POPULATION_STREAM: u64 = std::u64::MAX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Settings for the genetic algorithm
pub struct GaSettings {
    /// Requested population size, rounded down to a multiple of the node count
    pub popsize: usize,
    /// Standard deviation of the mutation
    pub sigma: f32,
    /// Fraction of the population kept as elites
    pub elite_ratio: f32,
    /// Every node evaluates the whole population on its own data
    pub data_parallel: bool,
    /// Seed of the population stream, identical on every node
    pub seed: u64,
}

impl Default for GaSettings {
    fn default() -> Self {
        GaSettings {
            popsize: 100,
            sigma: 0.1,
            elite_ratio: 0.1,
            data_parallel: false,
            seed: 2019,
        }
    }
}

impl GaSettings {
    /// Checks scalar ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.sigma >= 0.) || !self.sigma.is_finite() {
            return Err(ConfigError::OutOfRange {
                name: "sigma",
                expected: "non-negative and finite",
                value: self.sigma,
            }
            .into());
        }
        if !(self.elite_ratio > 0. && self.elite_ratio <= 1.) {
            return Err(ConfigError::OutOfRange {
                name: "elite_ratio",
                expected: "in (0, 1]",
                value: self.elite_ratio,
            }
            .into());
        }
        Ok(())
    }

    /// Elites kept out of `popsize` members
    pub fn num_elites(&self, popsize: usize) -> usize {
        // Small slack so that e.g. 20 × 0.1 is not floored to 1
        (popsize as f64 * self.elite_ratio as f64 + 1e-6).floor() as usize
    }
}

/// GA strategy state
#[derive(Debug, Clone)]
pub struct Genetic {
    sigma: f32,
    num_elites: usize,
    num_parameters: usize,
    seed: u64,
    generation: u64,
    population: Vec<f32>,
    elites: Vec<f32>,
    elite_indices: Vec<usize>,
    normal: Normal,
}

impl Genetic {
    /// Builds the strategy, with every elite a copy of the initial parameters
    pub fn new<M, C, E>(ws: &mut Workspace<M, C, E>, settings: &GaSettings) -> Result<Self>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        let popsize = ws.popsize();
        let num_elites = settings.num_elites(popsize);
        if num_elites == 0 {
            return Err(ConfigError::NoElites {
                popsize: popsize,
                ratio: settings.elite_ratio,
            }
            .into());
        }

        let p = ws.num_parameters();
        let elites: Vec<f32> = ws.theta().iter().cloned().cycle().take(num_elites * p).collect();
        let population: Vec<f32> = ws.theta().iter().cloned().cycle().take(popsize * p).collect();
        Ok(Genetic {
            sigma: settings.sigma,
            num_elites: num_elites,
            num_parameters: p,
            seed: settings.seed,
            generation: 0,
            population: population,
            elites: elites,
            elite_indices: (0..num_elites).collect(),
            normal: Normal::new(0., 1.),
        })
    }

    /// Number of elites
    pub fn num_elites(&self) -> usize {
        self.num_elites
    }

    /// Row `i` of the elite table
    pub fn elite(&self, i: usize) -> &[f32] {
        let p = self.num_parameters;
        &self.elites[i * p..(i + 1) * p]
    }

    /// The best elite
    pub fn best(&self) -> &[f32] {
        self.elite(0)
    }

    /// Row `i` of the population
    pub fn member(&self, i: usize) -> &[f32] {
        let p = self.num_parameters;
        &self.population[i * p..(i + 1) * p]
    }

    /// Population indices the elites were taken from in the last selection
    pub fn elite_indices(&self) -> &[usize] {
        &self.elite_indices
    }
}

impl Generational for Genetic {
    fn mutate<M, C, E>(&mut self, _ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        self.generation += 1;
        let mut rng = XorShiftRng::seed_from_u64(block_seed(
            self.seed,
            self.generation,
            POPULATION_STREAM,
            0,
        ));
        let p = self.num_parameters;
        let parents = Uniform::new(0, self.num_elites);

        let (head, tail) = self.population.split_at_mut(self.num_elites * p);
        head.copy_from_slice(&self.elites);
        for row in tail.chunks_mut(p) {
            let a = parents.sample(&mut rng);
            let b = parents.sample(&mut rng);
            let (pa, pb) = (&self.elites[a * p..(a + 1) * p], &self.elites[b * p..(b + 1) * p]);
            for ((x, u), v) in row.iter_mut().zip(pa).zip(pb) {
                let mask = if rng.gen::<bool>() { 1f32 } else { 0f32 };
                *x = u * mask + v * (1. - mask);
                *x += self.sigma * self.normal.sample(&mut rng) as f32;
            }
        }
        Ok(())
    }

    fn eval_fitness<M, C, E>(
        &mut self,
        ws: &mut Workspace<M, C, E>,
        data: &M::Input,
        target: &C::Target,
    ) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        let range = ws.fitness().fold_range();
        ws.check_fold(range.end - range.start)?;
        for (i, idx) in range.enumerate() {
            let loss = ws.evaluate(self.member(idx), data, target)?;
            ws.fitness.local_mut()[i] = loss;
        }
        ws.record_fold_loss();
        Ok(())
    }

    fn select<M, C, E>(&mut self, ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        let fitness = ws.fitness().global();
        let mut order: Vec<usize> = (0..fitness.len()).collect();
        order.sort_by_key(|i| FloatOrd(fitness[*i]));

        let p = self.num_parameters;
        for (e, idx) in order.iter().take(self.num_elites).enumerate() {
            self.elites[e * p..(e + 1) * p].copy_from_slice(&self.population[idx * p..(idx + 1) * p]);
        }
        self.elite_indices = order[..self.num_elites].to_vec();

        let best = fitness[order[0]];
        debug!("best fitness {} (member {})", best, order[0]);
        ws.stats.record("fitness_best", best);
        Ok(())
    }

    fn adapt<M, C, E>(&mut self, _ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        Ok(())
    }
}
