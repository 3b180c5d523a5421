use std::process;
use std::sync::Arc;

use clap::{App, ArgMatches};
use log::{error, info};

use ne_core::environment::LocalNode;
use ne_core::model::{Model, SerDe};
use ne_core::update::Adam;
use ne_core::{Environment, LocalCluster, Optimizer};

use ne_data::dataset::LabeledData;
use ne_data::datatypes::Matrix;
use ne_data::intrinsics::l2norm;

use ne_models::{Linear, Network, NllLoss, SerDeErr};

use neuroevo::bin_utils::args::{
    ArgAugmenter, DatasetArgs, DatasetMeta, ModelArgs, ModelParams, Opt, OptimizerArgs, TrainArgs, TrainMeta,
};
use neuroevo::bin_utils::loaders::{build_train_dataset, load_datasets, load_model, write_model};
use neuroevo::bin_utils::tester::{evaluate_test_data, TestReport};
use neuroevo::bin_utils::HarnessError;

/// Everything a node needs, shared read-only by all of them
struct Job {
    opt: Opt,
    dm: DatasetMeta,
    mp: ModelParams,
    tm: TrainMeta,
    train: Arc<LabeledData>,
    test: Arc<LabeledData>,
}

fn build_optimizer<M>(node: LocalNode, model: M, opt: &Opt) -> Result<Optimizer<M, NllLoss, LocalNode>, HarnessError>
where
    M: Model<Input = Matrix, Output = Matrix>,
{
    let optimizer = match opt {
        Opt::OpenAiEs { settings, lr } => {
            Optimizer::openai_es(node, model, NllLoss, Box::new(Adam::new(*lr)), settings)?
        }
        Opt::Snes(settings) => Optimizer::snes(node, model, NllLoss, settings)?,
        Opt::Genetic(settings) => Optimizer::genetic(node, model, NllLoss, settings)?,
    };
    Ok(optimizer)
}

// Runs every epoch on one node.  Only rank 0 reports, tests and saves.
fn train_node<M>(node: LocalNode, model: M, job: &Job) -> Result<Option<TestReport>, HarnessError>
where
    M: Model<Input = Matrix, Output = Matrix> + SerDe<Error = SerDeErr>,
{
    let rank = node.rank();
    let nodes = node.number_of_nodes();
    let mut optimizer = build_optimizer(node, model, &job.opt)?;
    let mut train = build_train_dataset(
        &job.train,
        job.dm.batch_size,
        rank,
        nodes,
        job.opt.data_parallel(),
        job.opt.seed(),
    );

    if rank == 0 {
        info!(
            "{} on {} node(s): population {}, {} parameters",
            job.opt.name(),
            nodes,
            optimizer.workspace().popsize(),
            optimizer.workspace().num_parameters()
        );
    }

    let samples = train.all().len();
    let mut report = None;
    for epoch in 1..=job.tm.epochs {
        train.shuffle();
        let mut seen = 0;
        for (batch_idx, batch) in train.data().enumerate() {
            optimizer.step(&batch.x, &batch.y[..])?;
            seen += batch.len();
            if rank == 0 && batch_idx % job.tm.log_interval == 0 {
                info!(
                    "Train Epoch: {} [{}/{} ({:.0}%)]\tLoss: {:.6}",
                    epoch,
                    seen,
                    samples,
                    100. * seen as f32 / samples as f32,
                    optimizer.loss()
                );
            }
        }

        if rank == 0 {
            info!(
                "Epoch {} done after {} generations, |theta| = {:.4}",
                epoch,
                optimizer.generation(),
                l2norm(optimizer.workspace().theta())
            );
        }

        if rank == 0 && !job.tm.no_test && !job.test.is_empty() {
            let model = optimizer.best_model()?;
            let r = evaluate_test_data(&model, &job.test, job.dm.test_batch_size);
            info!(
                "Test set: Average loss: {:.4}, Accuracy: {:.2}% ({} samples)",
                r.loss,
                100. * r.accuracy,
                r.samples
            );
            report = Some(r);
        }
    }

    if rank == 0 {
        if let Some(path) = &job.mp.save_model_path {
            write_model(&optimizer.best_model()?, path)?;
        }
    }
    Ok(report)
}

fn check_shape(name: &str, found: usize, expected: usize) -> Result<(), HarnessError> {
    if found != expected {
        return Err(HarnessError::Args(format!(
            "loaded model has {} {}, the data needs {}",
            found, name, expected
        )));
    }
    Ok(())
}

fn run(args: &ArgMatches) -> Result<(), HarnessError> {
    let opt = OptimizerArgs.load_from_args(args)?;
    let dm = DatasetArgs.load_from_args(args)?;
    let mp = ModelArgs.load_from_args(args)?;
    let tm = TrainArgs.load_from_args(args)?;

    let (train, test) = load_datasets(&dm, opt.seed())?;
    let dims = train.dims();
    let classes = train.num_classes().max(test.num_classes());
    if classes < 2 {
        return Err(HarnessError::Args("labels must be class indices with at least two classes".into()));
    }

    let nodes = tm.nodes;
    let job = Job {
        opt: opt,
        dm: dm,
        mp: mp,
        tm: tm,
        train: train,
        test: test,
    };

    let results = if job.mp.hidden_nodes.is_empty() {
        let init = match &job.mp.load_model_path {
            Some(path) => {
                let model: Linear = load_model(path)?;
                check_shape("inputs", model.dims(), dims)?;
                check_shape("outputs", model.outputs(), classes)?;
                model
            }
            None => Linear::new(dims, classes),
        };
        LocalCluster::run(nodes, |node| train_node(node, init.clone(), &job))
    } else {
        let init = match &job.mp.load_model_path {
            Some(path) => {
                let model: Network = load_model(path)?;
                check_shape("inputs", model.input_dim(), dims)?;
                check_shape("outputs", model.output_dim(), classes)?;
                model
            }
            None => {
                let mut sizes = job.mp.hidden_nodes.clone();
                sizes.push(classes);
                Network::with_seed(dims, &sizes, job.mp.act, job.opt.seed())
            }
        };
        LocalCluster::run(nodes, |node| train_node(node, init.clone(), &job))
    };

    let mut reports = Vec::with_capacity(results.len());
    for r in results {
        reports.push(r?);
    }
    if let Some(Some(report)) = reports.first() {
        info!(
            "Final test accuracy {:.2}% over {} samples",
            100. * report.accuracy,
            report.samples
        );
    }
    Ok(())
}

fn parse<'a>() -> ArgMatches<'a> {
    let base = App::new("evo-train")
        .version("0.1.0")
        .about("Trains a classifier with evolutionary strategies on in-process nodes");

    let base = OptimizerArgs.add_args(base);
    let base = DatasetArgs.add_args(base);
    let base = ModelArgs.add_args(base);
    TrainArgs.add_args(base).get_matches()
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse();
    if let Err(e) = run(&args) {
        error!("{}", e);
        process::exit(1);
    }
}
