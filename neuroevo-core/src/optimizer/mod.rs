//! Shared generational driver.
//!
//! `Optimizer` owns everything a strategy works on (a `Workspace`) plus the
//! strategy itself, and runs one generation per call to `step`:
//! mutate, evaluate, synchronize fitness, select, adapt.

use std::fmt::Debug;

use hashbrown::HashMap;
use log::{debug, info, warn};

use crate::environment::{Environment, SyncMode};
use crate::error::{ConfigError, Result, ShapeError};
use crate::genetic::{GaSettings, Genetic};
use crate::model::{Criterion, Model, ParameterAdapter};
use crate::openai::{EsSettings, OpenAiEs};
use crate::snes::{Snes, SnesSettings};
use crate::update::UpdateRule;

/// Named scalars recorded by the strategies during the last generation,
/// such as the gradient norm or the mean step size
#[derive(Clone, Default)]
pub struct GenerationStats {
    values: HashMap<&'static str, f32>,
}

impl GenerationStats {
    /// No statistics recorded yet
    pub fn new() -> Self {
        GenerationStats {
            values: HashMap::new(),
        }
    }

    #[inline]
    /// Records `value` under `name`, replacing the previous generation's
    pub fn record(&mut self, name: &'static str, value: f32) -> () {
        self.values.insert(name, value);
    }

    #[inline]
    /// Last value recorded under `name`
    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).cloned()
    }
}

impl Debug for GenerationStats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut names: Vec<&&'static str> = self.values.keys().collect();
        names.sort();
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={:.6}", name, self.values[*name])?;
        }
        Ok(())
    }
}

/// One fitness value per population member, with the fold owned by this
/// node exposed as a fixed window.  The window is the only part the node
/// writes; the rest only becomes meaningful after synchronization.
#[derive(Debug, Clone, PartialEq)]
pub struct FitnessBuffer {
    values: Vec<f32>,
    offset: usize,
    len: usize,
}

impl FitnessBuffer {
    /// Buffer for `popsize` members split over `nodes` nodes
    pub fn new(popsize: usize, nodes: usize, rank: usize) -> Self {
        let len = popsize / nodes;
        FitnessBuffer {
            values: vec![0f32; popsize],
            offset: rank * len,
            len: len,
        }
    }

    /// Population indices of the local fold
    pub fn fold_range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }

    /// The local fold
    pub fn local(&self) -> &[f32] {
        &self.values[self.offset..self.offset + self.len]
    }

    /// The local fold, writable
    pub fn local_mut(&mut self) -> &mut [f32] {
        &mut self.values[self.offset..self.offset + self.len]
    }

    /// The whole vector
    pub fn global(&self) -> &[f32] {
        &self.values
    }
}

/// Population and node bookkeeping, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Topology {
    /// Population size after rounding
    pub popsize: usize,
    /// Nodes the population is split across (1 when data parallel)
    pub nodes: usize,
    /// Rank within those nodes
    pub rank: usize,
    /// Members per node
    pub folds: usize,
}

impl Topology {
    /// Rounds `requested` down to a multiple of the population-parallel node count
    pub fn new(requested: usize, env_nodes: usize, env_rank: usize, data_parallel: bool) -> Result<Self> {
        if env_nodes == 0 || env_rank >= env_nodes {
            return Err(ConfigError::InvalidRank {
                rank: env_rank,
                nodes: env_nodes,
            }
            .into());
        }
        let nodes = if data_parallel { 1 } else { env_nodes };
        if requested < nodes || requested == 0 {
            return Err(ConfigError::PopulationTooSmall {
                requested: requested,
                nodes: nodes,
            }
            .into());
        }
        let popsize = (requested / nodes) * nodes;
        Ok(Topology {
            popsize: popsize,
            nodes: nodes,
            rank: if nodes == 1 { 0 } else { env_rank },
            folds: popsize / nodes,
        })
    }
}

/// Everything an optimizer strategy operates on
pub struct Workspace<M, C, E> {
    pub(crate) env: E,
    pub(crate) criterion: C,
    // Scratch copy, overwritten for every candidate
    pub(crate) model: M,
    // Canonical copy, always holds theta
    pub(crate) model_adapt: M,
    pub(crate) adapter: ParameterAdapter,
    pub(crate) topology: Topology,
    pub(crate) fitness: FitnessBuffer,
    pub(crate) theta: Vec<f32>,
    pub(crate) fitness_sync: SyncMode,
    pub(crate) loss: f32,
    pub(crate) stats: GenerationStats,
}

impl<M, C, E> Workspace<M, C, E>
where
    M: Model,
    C: Criterion<M::Output>,
    E: Environment,
{
    /// Sizes everything for `popsize` members of `model`
    pub fn new(env: E, model: M, criterion: C, popsize: usize, data_parallel: bool) -> Result<Self> {
        let topology = Topology::new(popsize, env.number_of_nodes(), env.rank(), data_parallel)?;
        let adapter = ParameterAdapter::new(&model);
        if adapter.num_parameters() == 0 {
            return Err(ConfigError::EmptyModel.into());
        }

        let theta = adapter.to_vec(&model)?;
        info!(
            "optimizer parameters: population={}, folds={}, parameters={}, rank={}/{}",
            topology.popsize,
            topology.folds,
            adapter.num_parameters(),
            env.rank(),
            env.number_of_nodes()
        );

        Ok(Workspace {
            fitness: FitnessBuffer::new(topology.popsize, topology.nodes, topology.rank),
            fitness_sync: if data_parallel {
                SyncMode::Average
            } else {
                SyncMode::Gather
            },
            model: model.clone(),
            model_adapt: model,
            env: env,
            criterion: criterion,
            adapter: adapter,
            topology: topology,
            theta: theta,
            loss: 0.,
            stats: GenerationStats::new(),
        })
    }

    /// Writes `values` into the scratch evaluation model
    pub fn update_model(&mut self, values: &[f32]) -> Result<()> {
        self.adapter.unflatten(values, &mut self.model)
    }

    /// Re-extracts theta from the canonical model
    pub fn update_theta(&mut self) -> Result<()> {
        self.adapter.flatten(&self.model_adapt, &mut self.theta)
    }

    /// Writes theta into the canonical model
    pub fn store_theta(&mut self) -> Result<()> {
        self.adapter.unflatten(&self.theta, &mut self.model_adapt)
    }

    /// Lets `f` update the canonical model's parameters as a flat vector, then
    /// re-extracts theta from the model
    pub fn update_parameters<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut [f32]) -> Result<()>,
    {
        let mut params = self.adapter.to_vec(&self.model_adapt)?;
        f(&mut params)?;
        self.adapter.unflatten(&params, &mut self.model_adapt)?;
        self.update_theta()
    }

    /// Loss of `params` on a batch, evaluated on the scratch model
    pub fn evaluate(&mut self, params: &[f32], data: &M::Input, target: &C::Target) -> Result<f32> {
        self.update_model(params)?;
        let output = self.model.forward(data);
        Ok(self.criterion.loss(&output, target))
    }

    /// Records the mean loss of the local fold
    pub(crate) fn record_fold_loss(&mut self) -> () {
        let local = self.fitness.local();
        let bad = local.iter().filter(|f| !f.is_finite()).count();
        if bad > 0 {
            warn!("{} of {} fitness values are not finite", bad, local.len());
        }
        self.loss = local.iter().sum::<f32>() / local.len() as f32;
    }

    pub(crate) fn check_fold(&self, rows: usize) -> Result<()> {
        if rows != self.topology.folds {
            return Err(ShapeError::Length {
                what: "population fold",
                expected: self.topology.folds,
                found: rows,
            }
            .into());
        }
        Ok(())
    }

    /// Length of theta
    pub fn num_parameters(&self) -> usize {
        self.adapter.num_parameters()
    }

    /// Population size after rounding
    pub fn popsize(&self) -> usize {
        self.topology.popsize
    }

    /// Population layout
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Current central estimate
    pub fn theta(&self) -> &[f32] {
        &self.theta
    }

    /// Fitness of the last generation
    pub fn fitness(&self) -> &FitnessBuffer {
        &self.fitness
    }

    /// Environment the optimizer runs in
    pub fn env(&self) -> &E {
        &self.env
    }
}

/// Where the driver is within a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Built, no generation run yet
    Constructed,
    /// Between generations
    Ready,
    /// Mutating and evaluating the population
    Evaluating,
    /// Waiting on the fitness synchronization
    Synchronizing,
    /// Selecting and updating the search distribution
    Adapting,
}

/// The hooks every strategy implements.  All of them work in place on the
/// strategy and the workspace.
pub trait Generational {
    /// Produces the population of the next generation
    fn mutate<M, C, E>(&mut self, ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment;

    /// Writes the loss of every locally owned member into the fitness fold
    fn eval_fitness<M, C, E>(
        &mut self,
        ws: &mut Workspace<M, C, E>,
        data: &M::Input,
        target: &C::Target,
    ) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment;

    /// Ranks or filters the synchronized fitness
    fn select<M, C, E>(&mut self, ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment;

    /// Updates the central estimate
    fn adapt<M, C, E>(&mut self, ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment;
}

/// The closed set of strategies
pub enum Strategy {
    /// Finite difference ES with an external update rule
    OpenAiEs(OpenAiEs),
    /// Separable NES with a per-parameter step size
    Snes(Snes),
    /// Genetic algorithm with elitism
    Genetic(Genetic),
}

impl Generational for Strategy {
    fn mutate<M, C, E>(&mut self, ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        match self {
            Strategy::OpenAiEs(s) => s.mutate(ws),
            Strategy::Snes(s) => s.mutate(ws),
            Strategy::Genetic(s) => s.mutate(ws),
        }
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
        match self {
            Strategy::OpenAiEs(s) => s.eval_fitness(ws, data, target),
            Strategy::Snes(s) => s.eval_fitness(ws, data, target),
            Strategy::Genetic(s) => s.eval_fitness(ws, data, target),
        }
    }

    fn select<M, C, E>(&mut self, ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        match self {
            Strategy::OpenAiEs(s) => s.select(ws),
            Strategy::Snes(s) => s.select(ws),
            Strategy::Genetic(s) => s.select(ws),
        }
    }

    fn adapt<M, C, E>(&mut self, ws: &mut Workspace<M, C, E>) -> Result<()>
    where
        M: Model,
        C: Criterion<M::Output>,
        E: Environment,
    {
        match self {
            Strategy::OpenAiEs(s) => s.adapt(ws),
            Strategy::Snes(s) => s.adapt(ws),
            Strategy::Genetic(s) => s.adapt(ws),
        }
    }
}

/// Evolutionary optimizer for the parameters of `M`, evaluated with `C`, on
/// one node of `E`.  `step` is a collective call: every node must call it the
/// same number of times.
pub struct Optimizer<M, C, E> {
    ws: Workspace<M, C, E>,
    strategy: Strategy,
    generation: usize,
    phase: Phase,
}

impl<M, C, E> Optimizer<M, C, E>
where
    M: Model,
    C: Criterion<M::Output>,
    E: Environment,
{
    /// OpenAI-ES, feeding its gradient estimate to `rule`
    pub fn openai_es(
        env: E,
        model: M,
        criterion: C,
        rule: Box<dyn UpdateRule>,
        settings: &EsSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let mut ws = Workspace::new(env, model, criterion, settings.popsize, settings.data_parallel)?;
        let strategy = OpenAiEs::new(&mut ws, settings, rule)?;
        Ok(Optimizer::from_parts(ws, Strategy::OpenAiEs(strategy)))
    }

    /// Separable natural evolution strategy
    pub fn snes(env: E, model: M, criterion: C, settings: &SnesSettings) -> Result<Self> {
        settings.validate()?;
        let mut ws = Workspace::new(
            env,
            model,
            criterion,
            settings.es.popsize,
            settings.es.data_parallel,
        )?;
        let strategy = Snes::new(&mut ws, settings)?;
        Ok(Optimizer::from_parts(ws, Strategy::Snes(strategy)))
    }

    /// Genetic algorithm
    pub fn genetic(env: E, model: M, criterion: C, settings: &GaSettings) -> Result<Self> {
        settings.validate()?;
        let mut ws = Workspace::new(env, model, criterion, settings.popsize, settings.data_parallel)?;
        let strategy = Genetic::new(&mut ws, settings)?;
        Ok(Optimizer::from_parts(ws, Strategy::Genetic(strategy)))
    }

    fn from_parts(ws: Workspace<M, C, E>, strategy: Strategy) -> Self {
        Optimizer {
            ws: ws,
            strategy: strategy,
            generation: 0,
            phase: Phase::Constructed,
        }
    }

    /// Runs exactly one generation on the batch
    pub fn step(&mut self, data: &M::Input, target: &C::Target) -> Result<()> {
        self.phase = Phase::Evaluating;
        self.strategy.mutate(&mut self.ws)?;
        self.strategy.eval_fitness(&mut self.ws, data, target)?;

        self.phase = Phase::Synchronizing;
        let mode = self.ws.fitness_sync;
        self.ws.env.synchronize(&mut self.ws.fitness.values, mode)?;

        self.phase = Phase::Adapting;
        self.strategy.select(&mut self.ws)?;
        self.strategy.adapt(&mut self.ws)?;

        self.generation += 1;
        self.phase = Phase::Ready;
        let loss = self.ws.loss;
        self.ws.stats.record("loss", loss);
        debug!(
            "rank {}: generation {} done, fold loss {}, {:?}",
            self.ws.env.rank(),
            self.generation,
            loss,
            self.ws.stats
        );
        Ok(())
    }

    /// Evaluates only the central estimate (the best elite for the GA),
    /// recording its loss
    pub fn eval_theta(&mut self, data: &M::Input, target: &C::Target) -> Result<M::Output> {
        let output = match &self.strategy {
            Strategy::Genetic(ga) => {
                self.ws.update_model(ga.best())?;
                self.ws.model.forward(data)
            }
            _ => self.ws.model_adapt.forward(data),
        };
        self.ws.loss = self.ws.criterion.loss(&output, target);
        Ok(output)
    }

    /// Writes `values` into the evaluation model
    pub fn update_model(&mut self, values: &[f32]) -> Result<()> {
        self.ws.update_model(values)
    }

    /// Re-extracts theta from the canonical model
    pub fn update_theta(&mut self) -> Result<()> {
        self.ws.update_theta()
    }

    /// Copy of the model holding the central estimate
    pub fn best_model(&self) -> Result<M> {
        let mut model = self.ws.model_adapt.clone();
        if let Strategy::Genetic(ga) = &self.strategy {
            self.ws.adapter.unflatten(ga.best(), &mut model)?;
        }
        Ok(model)
    }

    /// Last recorded loss: the mean fold loss after `step`, or the loss of
    /// the central estimate after `eval_theta`
    pub fn loss(&self) -> f32 {
        self.ws.loss
    }

    /// Number of generations run
    pub fn generation(&self) -> usize {
        self.generation
    }

    /// Driver state
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Shared optimizer state
    pub fn workspace(&self) -> &Workspace<M, C, E> {
        &self.ws
    }

    /// Active strategy
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Scores recorded during the last generation
    pub fn stats(&self) -> &GenerationStats {
        &self.ws.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_rounding() {
        for &(requested, nodes) in &[(10, 3), (7, 7), (100, 8), (5, 1), (9, 4)] {
            for rank in 0..nodes {
                let t = Topology::new(requested, nodes, rank, false).unwrap();
                assert_eq!(t.popsize, (requested / nodes) * nodes);
                assert!(t.popsize <= requested && requested - t.popsize < nodes);
                assert_eq!(t.folds * nodes, t.popsize);
                assert_eq!(t.rank, rank);
            }
        }
    }

    #[test]
    fn test_topology_errors() {
        assert_eq!(
            Topology::new(2, 3, 0, false).unwrap_err().to_string(),
            "configuration error: population of 2 cannot be split across 3 nodes"
        );
        assert!(Topology::new(0, 1, 0, false).is_err());
        assert!(Topology::new(4, 2, 2, false).is_err());
        // Data parallel nodes evaluate the whole population
        let t = Topology::new(2, 3, 2, true).unwrap();
        assert_eq!((t.popsize, t.nodes, t.rank, t.folds), (2, 1, 0, 2));
    }

    #[test]
    fn test_fitness_buffer() {
        let mut fb = FitnessBuffer::new(6, 3, 1);
        assert_eq!(fb.fold_range(), 2..4);
        fb.local_mut().copy_from_slice(&[5., 6.]);
        assert_eq!(fb.global(), &[0., 0., 5., 6., 0., 0.]);
        assert_eq!(fb.local(), &[5., 6.]);
    }

    #[test]
    fn test_generation_stats() {
        let mut stats = GenerationStats::new();
        stats.record("sigma_mean", 0.5);
        stats.record("loss", 2.);
        stats.record("loss", 1.);
        assert_eq!(stats.get("loss"), Some(1.));
        assert_eq!(stats.get("gradient_norm"), None);
        assert_eq!(format!("{:?}", stats), "loss=1.000000 sigma_mean=0.500000");
    }
}
