//! OpenAI-ES
//! ---
//!
//! Finite difference gradient estimation (Salimans et al.).  Each generation
//! perturbs theta with `sigma`-scaled noise, ranks the perturbations by loss,
//! and forms `g = Nᵗ · centered_ranks(-fitness) / (sigma · popsize)`.  The
//! resulting loss gradient `-g` is handed to an `UpdateRule`.
//!
//! Work can be spread over nodes in four ways, see `Parallelism`.

use log::{debug, info};
use serde_derive::{Deserialize, Serialize};

use crate::environment::{Environment, SyncMode};
use crate::error::{ConfigError, Result};
use crate::fitness::centered_ranks;
use crate::model::{Criterion, Model};
use crate::noise::{Distribution, NoiseGenerator, NoiseLayout, NoiseMatrix, NoiseSettings, Sampling};
use crate::optimizer::{Generational, Workspace};
use crate::update::UpdateRule;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Settings for OpenAI-ES
pub struct EsSettings {
    /// Requested population size, rounded down to a multiple of the node count
    pub popsize: usize,
    /// Perturbation scale
    pub sigma: f32,
    /// Noise distribution
    pub distribution: Distribution,
    /// Plain or antithetic sampling
    pub sampling: Sampling,
    /// Every node evaluates the whole population on its own data
    pub data_parallel: bool,
    /// Every node updates theta from its own fold only
    pub semi_updates: bool,
    /// Every node computes a shard of the gradient
    pub orthogonal_updates: bool,
    /// Global noise seed, identical on every node
    pub seed: u64,
}

impl Default for EsSettings {
    fn default() -> Self {
        EsSettings {
            popsize: 100,
            sigma: 0.1,
            distribution: Distribution::Gaussian,
            sampling: Sampling::Antithetic,
            data_parallel: false,
            semi_updates: false,
            orthogonal_updates: false,
            seed: 2019,
        }
    }
}

impl EsSettings {
    /// Checks scalar ranges and the parallelism flags
    pub fn validate(&self) -> Result<()> {
        if !(self.sigma > 0.) || !self.sigma.is_finite() {
            return Err(ConfigError::OutOfRange {
                name: "sigma",
                expected: "positive and finite",
                value: self.sigma,
            }
            .into());
        }
        self.parallelism().map(|_| ())
    }

    /// Resolves the parallelism flags
    pub fn parallelism(&self) -> Result<Parallelism> {
        let p = match (self.data_parallel, self.semi_updates, self.orthogonal_updates) {
            (true, true, _) => {
                return Err(ConfigError::IncompatibleParallelism("data parallelism", "semi-updates").into())
            }
            (true, _, true) => {
                return Err(
                    ConfigError::IncompatibleParallelism("data parallelism", "orthogonal updates").into(),
                )
            }
            (_, true, true) => {
                return Err(
                    ConfigError::IncompatibleParallelism("semi-updates", "orthogonal updates").into(),
                )
            }
            (true, false, false) => Parallelism::Data,
            (false, true, false) => Parallelism::SemiUpdates,
            (false, false, true) => Parallelism::OrthogonalUpdates,
            (false, false, false) => Parallelism::Population,
        };
        Ok(p)
    }
}

/// How a generation is split across nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    /// Each node evaluates its fold; fitness is gathered and every node
    /// computes the full update
    Population,
    /// Each node evaluates the whole population on its own data; fitness is
    /// averaged
    Data,
    /// Each node estimates a gradient from its own fold; gradients are averaged
    SemiUpdates,
    /// Each node evaluates its fold and computes its shard of the gradient;
    /// both are gathered
    OrthogonalUpdates,
}

/// Noise layouts and synchronization modes implied by a `Parallelism`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// Layout of the perturbation noise
    pub mutate_layout: NoiseLayout,
    /// Layout of the gradient estimation noise
    pub update_layout: NoiseLayout,
    /// Synchronization of the fitness vector
    pub fitness_sync: SyncMode,
    /// Synchronization of the gradient estimate
    pub gradient_sync: SyncMode,
}

impl Parallelism {
    /// Layouts and synchronization for this mode
    pub fn plan(self) -> Plan {
        use self::NoiseLayout::*;
        match self {
            Parallelism::Population => Plan {
                mutate_layout: SliceH,
                update_layout: Full,
                fitness_sync: SyncMode::Gather,
                gradient_sync: SyncMode::None,
            },
            Parallelism::Data => Plan {
                mutate_layout: Full,
                update_layout: Full,
                fitness_sync: SyncMode::Average,
                gradient_sync: SyncMode::None,
            },
            Parallelism::SemiUpdates => Plan {
                mutate_layout: SliceH,
                update_layout: SliceH,
                fitness_sync: SyncMode::None,
                gradient_sync: SyncMode::Average,
            },
            Parallelism::OrthogonalUpdates => Plan {
                mutate_layout: SliceH,
                update_layout: SliceV,
                fitness_sync: SyncMode::Gather,
                gradient_sync: SyncMode::Gather,
            },
        }
    }
}

/// Noise bookkeeping shared by the gradient estimating strategies
#[derive(Debug, Clone)]
pub struct Search {
    parallelism: Parallelism,
    plan: Plan,
    noise: NoiseGenerator,
    mutate_noise: NoiseMatrix,
}

impl Search {
    /// Builds the noise generator for `ws` and installs the fitness
    /// synchronization mode
    pub fn new<M, C, E>(
        ws: &mut Workspace<M, C, E>,
        settings: &EsSettings,
        parallelism: Parallelism,
    ) -> Result<Self>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        let plan = parallelism.plan();
        ws.fitness_sync = plan.fitness_sync;
        let noise = NoiseGenerator::new(NoiseSettings {
            popsize: ws.popsize(),
            num_parameters: ws.num_parameters(),
            nodes: ws.env.number_of_nodes(),
            rank: ws.env.rank(),
            distribution: settings.distribution,
            sampling: settings.sampling,
            mutate_layout: plan.mutate_layout,
            update_layout: plan.update_layout,
            seed: settings.seed,
        })?;
        info!(
            "search: {:?}, mutate={:?}, update={:?}, {:?} noise, {:?} sampling",
            parallelism, plan.mutate_layout, plan.update_layout, settings.distribution, settings.sampling
        );

        Ok(Search {
            parallelism: parallelism,
            plan: plan,
            mutate_noise: NoiseMatrix::from_vec(0, ws.num_parameters(), Vec::new())?,
            noise: noise,
        })
    }

    /// Active mode
    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    /// Layouts and synchronization in use
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Length of a gradient buffer.  With orthogonal updates the buffer is
    /// padded to a whole number of equal shards.
    pub fn gradient_len(&self, num_parameters: usize) -> usize {
        match self.plan.update_layout {
            NoiseLayout::SliceV => self.noise.chunk() * self.noise.settings().nodes,
            _ => num_parameters,
        }
    }

    /// Advances the generation and materializes the perturbations
    pub fn mutate(&mut self) -> () {
        self.noise.step();
        self.mutate_noise = self.noise.generate_mutate_noise();
    }

    /// Evaluates every local perturbation, where `perturb(j, theta_j, eps)`
    /// gives parameter `j` of a member
    pub fn eval_population<M, C, E, F>(
        &self,
        ws: &mut Workspace<M, C, E>,
        data: &M::Input,
        target: &C::Target,
        perturb: F,
    ) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
        F: Fn(usize, f32, f32) -> f32,
    {
        ws.check_fold(self.mutate_noise.rows())?;
        let mut candidate = vec![0f32; ws.num_parameters()];
        for i in 0..self.mutate_noise.rows() {
            for (j, (c, (t, e))) in candidate
                .iter_mut()
                .zip(ws.theta.iter().zip(self.mutate_noise.row(i)))
                .enumerate()
            {
                *c = perturb(j, *t, *e);
            }
            let loss = ws.evaluate(&candidate, data, target)?;
            ws.fitness.local_mut()[i] = loss;
        }
        ws.record_fold_loss();
        Ok(())
    }

    /// Fitness the update is computed from: the local fold when each node
    /// updates from its own rows, the full vector otherwise
    pub fn fitness_for_update<'a, M, C, E>(&self, ws: &'a Workspace<M, C, E>) -> &'a [f32] {
        match self.plan.update_layout {
            NoiseLayout::SliceH => ws.fitness.local(),
            _ => ws.fitness.global(),
        }
    }

    /// Noise matching the update layout for this generation
    pub fn update_noise(&self) -> NoiseMatrix {
        self.noise.generate_update_noise()
    }

    /// Computes `Σ_i f(noise[i]) · weights[i]` into this node's part of
    /// `gradient`, then synchronizes it
    pub fn estimate<E, F>(
        &self,
        env: &mut E,
        noise: &NoiseMatrix,
        weights: &[f32],
        f: F,
        gradient: &mut [f32],
    ) -> Result<()>
    where
        E: Environment,
        F: Fn(f32) -> f32 + Sync,
    {
        let local = match self.plan.update_layout {
            NoiseLayout::SliceV => {
                let start = self.noise.settings().rank * self.noise.chunk();
                start..start + self.noise.chunk()
            }
            _ => 0..gradient.len(),
        };
        noise.transpose_mul_with(weights, &mut gradient[local], f)?;
        env.synchronize(gradient, self.plan.gradient_sync)
    }
}

/// OpenAI-ES with an external update rule
pub struct OpenAiEs {
    search: Search,
    sigma: f32,
    shaped: Vec<f32>,
    gradient: Vec<f32>,
    rule: Box<dyn UpdateRule>,
}

impl OpenAiEs {
    /// Builds the strategy for `ws`
    pub fn new<M, C, E>(
        ws: &mut Workspace<M, C, E>,
        settings: &EsSettings,
        rule: Box<dyn UpdateRule>,
    ) -> Result<Self>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        let search = Search::new(ws, settings, settings.parallelism()?)?;
        let gradient = vec![0f32; search.gradient_len(ws.num_parameters())];
        Ok(OpenAiEs {
            search: search,
            sigma: settings.sigma,
            shaped: Vec::new(),
            gradient: gradient,
            rule: rule,
        })
    }

    /// Noise bookkeeping
    pub fn search(&self) -> &Search {
        &self.search
    }

    /// Last ascent direction, before scaling.  Padded with orthogonal updates.
    pub fn gradient(&self) -> &[f32] {
        &self.gradient
    }
}

impl Generational for OpenAiEs {
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
        let sigma = self.sigma;
        self.search
            .eval_population(ws, data, target, |_, t, e| t + sigma * e)
    }

    fn select<M, C, E>(&mut self, ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        // Lower loss is better, so rank the negated loss
        let negated: Vec<f32> = self
            .search
            .fitness_for_update(ws)
            .iter()
            .map(|f| -f)
            .collect();
        self.shaped = centered_ranks(&negated);
        Ok(())
    }

    fn adapt<M, C, E>(&mut self, ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        let noise = self.search.update_noise();
        self.search
            .estimate(&mut ws.env, &noise, &self.shaped, |x| x, &mut self.gradient)?;

        let p = ws.num_parameters();
        let scale = 1. / (self.sigma * ws.popsize() as f32);
        let loss_grad: Vec<f32> = self.gradient[..p].iter().map(|g| -g * scale).collect();
        let norm = loss_grad.iter().map(|g| g * g).sum::<f32>().sqrt();
        debug!("gradient norm {}", norm);
        ws.stats.record("gradient_norm", norm);

        let rule = &mut self.rule;
        ws.update_parameters(|params| rule.step(params, &loss_grad))
    }
}
