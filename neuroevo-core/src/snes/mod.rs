//! Separable natural evolution strategy
//!
//! Keeps a per-parameter standard deviation next to theta and adapts both
//! from the same utility weighted noise, with no external update rule.

use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::environment::Environment;
use crate::error::{ConfigError, Result};
use crate::fitness::normalized_ranks;
use crate::model::{Criterion, Model};
use crate::openai::{EsSettings, Search};
use crate::optimizer::{Generational, Workspace};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Settings for SNES
pub struct SnesSettings {
    /// Population, noise and parallelism settings, shared with OpenAI-ES.
    /// `sigma` is the initial value of every per-parameter deviation.
    #[serde(flatten)]
    pub es: EsSettings,
    /// Learning rate of theta
    pub lr_theta: f32,
    /// Fraction of the population receiving positive utility
    pub utility_ratio: f32,
}

impl Default for SnesSettings {
    fn default() -> Self {
        SnesSettings {
            es: EsSettings::default(),
            lr_theta: 0.001,
            utility_ratio: 0.5,
        }
    }
}

impl SnesSettings {
    /// Checks scalar ranges and the parallelism flags
    pub fn validate(&self) -> Result<()> {
        self.es.validate()?;
        if !(self.lr_theta > 0.) || !self.lr_theta.is_finite() {
            return Err(ConfigError::OutOfRange {
                name: "lr_theta",
                expected: "positive and finite",
                value: self.lr_theta,
            }
            .into());
        }
        if !(self.utility_ratio > 0. && self.utility_ratio <= 1.) {
            return Err(ConfigError::OutOfRange {
                name: "utility_ratio",
                expected: "in (0, 1]",
                value: self.utility_ratio,
            }
            .into());
        }
        Ok(())
    }
}

/// Learning rate of sigma for `num_parameters` parameters
pub fn sigma_learning_rate(num_parameters: usize) -> f32 {
    let p = num_parameters as f32;
    (3. + p.ln()) / (5. * p.sqrt())
}

/// SNES strategy state
pub struct Snes {
    search: Search,
    sigma: Vec<f32>,
    lr_theta: f32,
    lr_sigma: f32,
    utility_ratio: f32,
    utilities: Vec<f32>,
    theta_gradient: Vec<f32>,
    sigma_gradient: Vec<f32>,
}

impl Snes {
    /// Builds the strategy and resets theta to zero
    pub fn new<M, C, E>(ws: &mut Workspace<M, C, E>, settings: &SnesSettings) -> Result<Self>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        let search = Search::new(ws, &settings.es, settings.es.parallelism()?)?;
        let p = ws.num_parameters();
        let len = search.gradient_len(p);

        for t in ws.theta.iter_mut() {
            *t = 0.;
        }
        ws.store_theta()?;

        Ok(Snes {
            search: search,
            sigma: vec![settings.es.sigma; p],
            lr_theta: settings.lr_theta,
            lr_sigma: sigma_learning_rate(p),
            utility_ratio: settings.utility_ratio,
            utilities: Vec::new(),
            theta_gradient: vec![0f32; len],
            sigma_gradient: vec![0f32; len],
        })
    }

    /// Per-parameter standard deviation
    pub fn sigma(&self) -> &[f32] {
        &self.sigma
    }

    /// Learning rate of sigma
    pub fn lr_sigma(&self) -> f32 {
        self.lr_sigma
    }

    /// Noise bookkeeping
    pub fn search(&self) -> &Search {
        &self.search
    }
}

impl Generational for Snes {
    fn mutate<M, C, E>(&mut self, _ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        self.search.mutate();
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
        let sigma = &self.sigma;
        self.search
            .eval_population(ws, data, target, |j, t, e| t + sigma[j] * e)
    }

    fn select<M, C, E>(&mut self, ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        let negated: Vec<f32> = self
            .search
            .fitness_for_update(ws)
            .iter()
            .map(|f| -f)
            .collect();
        self.utilities = normalized_ranks(&negated, self.utility_ratio);
        Ok(())
    }

    fn adapt<M, C, E>(&mut self, ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        let noise = self.search.update_noise();
        self.search.estimate(
            &mut ws.env,
            &noise,
            &self.utilities,
            |x| x,
            &mut self.theta_gradient,
        )?;
        self.search.estimate(
            &mut ws.env,
            &noise,
            &self.utilities,
            |x| x * x - 1.,
            &mut self.sigma_gradient,
        )?;

        let n = ws.popsize() as f32;
        let grads = self.theta_gradient.iter().zip(self.sigma_gradient.iter());
        for ((t, s), (gt, gs)) in ws.theta.iter_mut().zip(self.sigma.iter_mut()).zip(grads) {
            *t += self.lr_theta * (gt / n / *s);
            *s *= (0.5 * self.lr_sigma * gs / n).exp();
        }

        let sigma_mean = self.sigma.iter().sum::<f32>() / self.sigma.len() as f32;
        debug!("sigma mean {}", sigma_mean);
        ws.stats.record("sigma_mean", sigma_mean);
        ws.store_theta()
    }
}
