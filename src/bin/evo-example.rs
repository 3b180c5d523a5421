use std::process;

use clap::{App, Arg};
use log::{error, info};

use neuroevo::example::{run_example, Ackley, ExampleOpt, Matyas, Pair};

fn main() -> () {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = App::new("evo-example")
        .about("Minimizes a two dimensional test function")
        .arg(
            Arg::with_name("ne_opt")
                .long("ne-opt")
                .takes_value(true)
                .possible_values(&["openai-es", "snes", "ga"])
                .default_value("openai-es")
                .help("Evolutionary optimizer"),
        )
        .arg(
            Arg::with_name("objective")
                .long("objective")
                .takes_value(true)
                .possible_values(&["matyas", "ackley"])
                .default_value("matyas")
                .help("Function to minimize"),
        )
        .arg(
            Arg::with_name("generations")
                .long("generations")
                .takes_value(true)
                .default_value("100")
                .help("Number of generations"),
        )
        .get_matches();

    let opt = match args.value_of("ne_opt") {
        Some("snes") => ExampleOpt::Snes,
        Some("ga") => ExampleOpt::Genetic,
        _ => ExampleOpt::OpenAiEs,
    };
    let generations = match args.value_of("generations").map(|g| g.parse::<usize>()) {
        Some(Ok(g)) => g,
        _ => {
            error!("--generations must be a non-negative integer");
            process::exit(1);
        }
    };

    let init = Pair([10., 10.]);
    let result = match args.value_of("objective") {
        Some("ackley") => run_example(opt, Ackley, init, generations, 645342312),
        _ => run_example(opt, Matyas, init, generations, 645342312),
    };
    match result {
        Ok((loss, model)) => info!("Best Score: {}, Best Model: {},{}", loss, model.0[0], model.0[1]),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
