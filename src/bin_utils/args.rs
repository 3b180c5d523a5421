use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

use clap::{App, Arg, ArgMatches};
use serde::de::DeserializeOwned;

use ne_core::{EsSettings, GaSettings, SnesSettings};
use ne_models::NonLinearity;

use super::HarnessError;

/// Trait to add new arguments to the current app
pub trait ArgAugmenter {
    /// Type of struct to output from this parser
    type Output;

    /// Specifies arguments to add
    fn add_args<'a, 'b>(&self, app: App<'a, 'b>) -> App<'a, 'b>;

    /// Parses the arguments
    fn load_from_args<'a>(&self, args: &ArgMatches<'a>) -> Result<Self::Output, HarnessError>;
}

// Parses `--name` into `slot` if it was given
fn override_value<'a, T>(args: &ArgMatches<'a>, name: &str, slot: &mut T) -> Result<(), HarnessError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(v) = args.value_of(name) {
        *slot = v
            .parse()
            .map_err(|e| HarnessError::Args(format!("--{} {}: {}", name, v, e)))?;
    }
    Ok(())
}

fn parse_value<'a, T>(args: &ArgMatches<'a>, name: &str, default: T) -> Result<T, HarnessError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let mut value = default;
    override_value(args, name, &mut value)?;
    Ok(value)
}

/// Reads optimizer settings from a JSON file.  Missing fields keep their
/// defaults.
pub fn read_config<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, HarnessError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Enum defining the types of optimizers
#[derive(Debug, Clone, PartialEq)]
pub enum Opt {
    /// OpenAI-ES, with Adam applying the gradient at rate `lr`
    OpenAiEs {
        /// Engine settings
        settings: EsSettings,
        /// Adam learning rate
        lr: f32,
    },
    /// Separable NES
    Snes(SnesSettings),
    /// Genetic algorithm
    Genetic(GaSettings),
}

impl Opt {
    /// Short name, as accepted by `--ne-opt`
    pub fn name(&self) -> &'static str {
        match self {
            Opt::OpenAiEs { .. } => "openai-es",
            Opt::Snes(_) => "snes",
            Opt::Genetic(_) => "ga",
        }
    }

    /// Seed shared by every node
    pub fn seed(&self) -> u64 {
        match self {
            Opt::OpenAiEs { settings, .. } => settings.seed,
            Opt::Snes(s) => s.es.seed,
            Opt::Genetic(s) => s.seed,
        }
    }

    /// Whether every node trains on its own shard of the data
    pub fn data_parallel(&self) -> bool {
        match self {
            Opt::OpenAiEs { settings, .. } => settings.data_parallel,
            Opt::Snes(s) => s.es.data_parallel,
            Opt::Genetic(s) => s.data_parallel,
        }
    }
}

/// Harness defaults, used when no `--config` is given
fn es_defaults() -> EsSettings {
    EsSettings {
        popsize: 100,
        sigma: 0.01,
        seed: 42,
        ..EsSettings::default()
    }
}

// Applies the flags shared by OpenAI-ES and SNES
fn es_overrides<'a>(args: &ArgMatches<'a>, es: &mut EsSettings) -> Result<(), HarnessError> {
    override_value(args, "popsize", &mut es.popsize)?;
    override_value(args, "sigma", &mut es.sigma)?;
    override_value(args, "noise_dist", &mut es.distribution)?;
    override_value(args, "sampling", &mut es.sampling)?;
    override_value(args, "seed", &mut es.seed)?;
    es.data_parallel |= args.is_present("ddp");
    es.semi_updates |= args.is_present("semi_updates");
    es.orthogonal_updates |= args.is_present("orthogonal_updates");
    Ok(())
}

/// Struct defining the optimizer arguments using ArgAugmenter.  Explicit
/// flags override values read from `--config`.
pub struct OptimizerArgs;

impl ArgAugmenter for OptimizerArgs {
    type Output = Opt;

    /// Specifies arguments to add for the optimizer
    fn add_args<'a, 'b>(&self, app: App<'a, 'b>) -> App<'a, 'b> {
        app
      .arg(Arg::with_name("ne_opt")
           .long("ne-opt")
           .takes_value(true)
           .possible_values(&["openai-es", "snes", "ga"])
           .default_value("openai-es")
           .help("Evolutionary optimizer"))
      .arg(Arg::with_name("config")
           .long("config")
           .takes_value(true)
           .help("JSON file with the settings of the chosen optimizer"))
      .arg(Arg::with_name("popsize")
           .long("popsize")
           .takes_value(true)
           .help("Population size.  Default is 100"))
      .arg(Arg::with_name("sigma")
           .long("sigma")
           .takes_value(true)
           .help("Noise standard deviation.  Default is 0.01"))
      .arg(Arg::with_name("noise_dist")
           .long("noise-dist")
           .takes_value(true)
           .possible_values(&["gaussian", "uniform"])
           .help("Distribution of the perturbations"))
      .arg(Arg::with_name("sampling")
           .long("sampling")
           .takes_value(true)
           .possible_values(&["plain", "antithetic"])
           .help("Population sampling strategy"))
      .arg(Arg::with_name("ddp")
           .long("ddp")
           .help("Data parallel: every node evaluates the whole population on its own data"))
      .arg(Arg::with_name("semi_updates")
           .long("semi-updates")
           .conflicts_with_all(&["ddp", "orthogonal_updates"])
           .help("Every node updates from its own population fold"))
      .arg(Arg::with_name("orthogonal_updates")
           .long("orthogonal-updates")
           .conflicts_with("ddp")
           .help("Every node computes a slice of the gradient"))
      .arg(Arg::with_name("lr")
           .long("lr")
           .takes_value(true)
           .help("Learning rate.  Default is 0.01 for openai-es"))
      .arg(Arg::with_name("elite_ratio")
           .long("elite-ratio")
           .takes_value(true)
           .help("Fraction of the population kept by the GA.  Default is 0.1"))
      .arg(Arg::with_name("seed")
           .long("seed")
           .takes_value(true)
           .help("Random seed, shared by all nodes.  Default is 42"))
    }

    /// Parses the arguments for the optimizer
    fn load_from_args<'a>(&self, args: &ArgMatches<'a>) -> Result<Self::Output, HarnessError> {
        let config = args.value_of("config");
        let opt = match args.value_of("ne_opt").unwrap_or("openai-es") {
            "openai-es" => {
                let mut settings = match config {
                    Some(path) => read_config(path)?,
                    None => es_defaults(),
                };
                es_overrides(args, &mut settings)?;
                let lr = parse_value(args, "lr", 0.01f32)?;
                Opt::OpenAiEs {
                    settings: settings,
                    lr: lr,
                }
            }
            "snes" => {
                let mut settings = match config {
                    Some(path) => read_config(path)?,
                    None => SnesSettings {
                        es: es_defaults(),
                        ..SnesSettings::default()
                    },
                };
                es_overrides(args, &mut settings.es)?;
                override_value(args, "lr", &mut settings.lr_theta)?;
                Opt::Snes(settings)
            }
            "ga" => {
                let mut settings = match config {
                    Some(path) => read_config(path)?,
                    None => GaSettings {
                        sigma: 0.01,
                        seed: 42,
                        ..GaSettings::default()
                    },
                };
                override_value(args, "popsize", &mut settings.popsize)?;
                override_value(args, "sigma", &mut settings.sigma)?;
                override_value(args, "elite_ratio", &mut settings.elite_ratio)?;
                override_value(args, "seed", &mut settings.seed)?;
                settings.data_parallel |= args.is_present("ddp");
                Opt::Genetic(settings)
            }
            other => return Err(HarnessError::Args(format!("unknown optimizer `{}`", other))),
        };
        Ok(opt)
    }
}

/// Specifies the metadata for the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetMeta {
    /// Training file.  Without one a synthetic set is generated
    pub fname: Option<String>,
    /// Test file.  Without one the tail of the training set is held out
    pub tname: Option<String>,
    /// Whether the files are CSV rather than libsvm
    pub csv: bool,
    /// Number of features; sparse libsvm rows are densified to it
    pub dims: Option<usize>,
    /// Samples per training batch
    pub batch_size: usize,
    /// Samples per test batch
    pub test_batch_size: usize,
    /// Fraction held out when there is no test file
    pub holdout: f32,
}

/// Struct defining the dataset arguments using ArgAugmenter
pub struct DatasetArgs;

impl ArgAugmenter for DatasetArgs {
    type Output = DatasetMeta;

    /// Specifies arguments to add for the dataset
    fn add_args<'a, 'b>(&self, app: App<'a, 'b>) -> App<'a, 'b> {
        app.arg(
            Arg::with_name("train")
                .index(1)
                .help("Training file.  Omit to train on a synthetic dataset"),
        )
        .arg(
            Arg::with_name("test")
                .short("t")
                .long("test")
                .takes_value(true)
                .help("After every epoch, tests against the provided dataset"),
        )
        .arg(
            Arg::with_name("csv")
                .long("csv")
                .help("Files are comma separated with the label in the first column"),
        )
        .arg(
            Arg::with_name("features")
                .long("features")
                .takes_value(true)
                .help("Number of features in the feature vector"),
        )
        .arg(
            Arg::with_name("batch_size")
                .long("batch-size")
                .takes_value(true)
                .help("Input batch size for training.  Default is 64"),
        )
        .arg(
            Arg::with_name("test_batch_size")
                .long("test-batch-size")
                .takes_value(true)
                .help("Input batch size for testing.  Default is 1000"),
        )
        .arg(
            Arg::with_name("holdout")
                .long("holdout")
                .takes_value(true)
                .help("Fraction of the training set held out for testing.  Default is 0.2"),
        )
    }

    /// Parses the arguments for the dataset
    fn load_from_args<'a>(&self, args: &ArgMatches<'a>) -> Result<Self::Output, HarnessError> {
        let dims = match args.value_of("features") {
            Some(_) => Some(parse_value(args, "features", 0usize)?),
            None => None,
        };
        let meta = DatasetMeta {
            fname: args.value_of("train").map(String::from),
            tname: args.value_of("test").map(String::from),
            csv: args.is_present("csv"),
            dims: dims,
            batch_size: parse_value(args, "batch_size", 64usize)?,
            test_batch_size: parse_value(args, "test_batch_size", 1000usize)?,
            holdout: parse_value(args, "holdout", 0.2f32)?,
        };
        if meta.batch_size == 0 || meta.test_batch_size == 0 {
            return Err(HarnessError::Args("batch sizes must be positive".into()));
        }
        if !(meta.holdout >= 0. && meta.holdout < 1.) {
            return Err(HarnessError::Args("--holdout must be in [0, 1)".into()));
        }
        Ok(meta)
    }
}

/// Capture the model parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    /// Hidden layer widths.  Empty trains a linear model
    pub hidden_nodes: Vec<usize>,
    /// Type of non-linearity between layers
    pub act: NonLinearity,
    /// Optional path to load a model
    pub load_model_path: Option<String>,
    /// Optional path to save the model
    pub save_model_path: Option<String>,
}

/// Struct defining the model arguments using ArgAugmenter
pub struct ModelArgs;

impl ArgAugmenter for ModelArgs {
    type Output = ModelParams;

    fn add_args<'a, 'b>(&self, app: App<'a, 'b>) -> App<'a, 'b> {
        app.arg(
            Arg::with_name("hidden")
                .long("hidden")
                .takes_value(true)
                .use_delimiter(true)
                .multiple(true)
                .help("Hidden layer widths, e.g. --hidden 128,64.  Omit for a linear model"),
        )
        .arg(
            Arg::with_name("activation")
                .long("activation")
                .takes_value(true)
                .possible_values(&["relu", "tanh", "sigmoid", "elu", "linear"])
                .help("Activation between hidden layers.  Default is relu"),
        )
        .arg(
            Arg::with_name("load_model")
                .long("load-model")
                .takes_value(true)
                .help("Starts from a saved model"),
        )
        .arg(
            Arg::with_name("save_model")
                .long("save-model")
                .takes_value(true)
                .help("Writes the final model to this path"),
        )
    }

    fn load_from_args<'a>(&self, args: &ArgMatches<'a>) -> Result<Self::Output, HarnessError> {
        let hidden = match args.values_of("hidden") {
            Some(values) => values
                .map(|v| match v.trim().parse::<usize>() {
                    Ok(w) if w > 0 => Ok(w),
                    _ => Err(HarnessError::Args(format!("bad hidden width `{}`", v))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        Ok(ModelParams {
            hidden_nodes: hidden,
            act: parse_value(args, "activation", NonLinearity::ReLu)?,
            load_model_path: args.value_of("load_model").map(String::from),
            save_model_path: args.value_of("save_model").map(String::from),
        })
    }
}

/// Epoch and reporting options
#[derive(Debug, Clone, PartialEq)]
pub struct TrainMeta {
    /// Passes over the training data
    pub epochs: usize,
    /// Batches between progress reports
    pub log_interval: usize,
    /// In-process nodes to run
    pub nodes: usize,
    /// Skip the test pass
    pub no_test: bool,
}

/// Struct defining the training loop arguments using ArgAugmenter
pub struct TrainArgs;

impl ArgAugmenter for TrainArgs {
    type Output = TrainMeta;

    fn add_args<'a, 'b>(&self, app: App<'a, 'b>) -> App<'a, 'b> {
        app.arg(
            Arg::with_name("epochs")
                .long("epochs")
                .takes_value(true)
                .help("Number of epochs to train.  Default is 10"),
        )
        .arg(
            Arg::with_name("log_interval")
                .long("log-interval")
                .takes_value(true)
                .help("How many batches to wait before logging training status.  Default is 10"),
        )
        .arg(
            Arg::with_name("nodes")
                .long("nodes")
                .takes_value(true)
                .help("Number of in-process nodes.  Default is 1"),
        )
        .arg(
            Arg::with_name("no_test")
                .long("no-test")
                .help("Skips testing after each epoch"),
        )
    }

    fn load_from_args<'a>(&self, args: &ArgMatches<'a>) -> Result<Self::Output, HarnessError> {
        let meta = TrainMeta {
            epochs: parse_value(args, "epochs", 10usize)?,
            log_interval: parse_value(args, "log_interval", 10usize)?.max(1),
            nodes: parse_value(args, "nodes", 1usize)?,
            no_test: args.is_present("no_test"),
        };
        if meta.nodes == 0 {
            return Err(HarnessError::Args("--nodes must be at least 1".into()));
        }
        Ok(meta)
    }
}
