mod common;

use common::{Distance, Point};
use ne_core::error::{ConfigError, Error};
use ne_core::update::Sgd;
use ne_core::{Environment, EsSettings, GaSettings, LocalCluster, Optimizer, SingleNode, SnesSettings};

const TARGET: [f32; 5] = [0.4, -1.2, 0.9, 0.1, -0.3];
const START: [f32; 5] = [0.; 5];

fn settings(popsize: usize) -> EsSettings {
    EsSettings {
        popsize: popsize,
        sigma: 0.1,
        seed: 7,
        ..EsSettings::default()
    }
}

fn run_es<E: Environment>(env: E, settings: &EsSettings, target: &[f32], steps: usize) -> Vec<f32> {
    let mut opt = Optimizer::openai_es(
        env,
        Point::new(&START),
        Distance,
        Box::new(Sgd::new(0.02)),
        settings,
    )
    .unwrap();
    for _ in 0..steps {
        opt.step(&(), target).unwrap();
    }
    opt.workspace().theta().to_vec()
}

#[test]
fn test_population_parallel_matches_single_node() {
    let s = settings(12);
    let single = run_es(SingleNode, &s, &TARGET, 5);
    let thetas = LocalCluster::run(3, |node| run_es(node, &s, &TARGET, 5));
    for theta in thetas {
        assert_eq!(theta, single);
    }
}

#[test]
fn test_orthogonal_updates_match_single_node() {
    let s = EsSettings {
        orthogonal_updates: true,
        ..settings(12)
    };
    let single = run_es(SingleNode, &settings(12), &TARGET, 5);
    // 5 parameters over 2 nodes: shards of 3, one padded column
    let thetas = LocalCluster::run(2, |node| run_es(node, &s, &TARGET, 5));
    for theta in thetas {
        assert_eq!(theta, single);
    }
}

#[test]
fn test_semi_updates_agree_across_nodes() {
    let s = EsSettings {
        semi_updates: true,
        ..settings(12)
    };
    let thetas = LocalCluster::run(3, |node| run_es(node, &s, &TARGET, 5));
    assert_ne!(thetas[0], START.to_vec());
    assert_eq!(thetas[0], thetas[1]);
    assert_eq!(thetas[1], thetas[2]);
}

#[test]
fn test_data_parallel_averages_fitness() {
    let s = EsSettings {
        data_parallel: true,
        ..settings(10)
    };
    // Mean squared distance to either target ranks like the distance to the
    // midpoint, so two data shards behave like one node on the midpoint
    let a = [1f32, 0., -1., 0.5, 0.];
    let b = [0f32, 1., -1., -0.5, 0.4];
    let mid: Vec<f32> = a.iter().zip(&b).map(|(x, y)| (x + y) / 2.).collect();

    let single = run_es(SingleNode, &settings(10), &mid, 3);
    let thetas = LocalCluster::run(2, |node| {
        let target = if node.rank() == 0 { a } else { b };
        run_es(node, &s, &target, 3)
    });
    for theta in thetas {
        for (x, y) in theta.iter().zip(&single) {
            assert!((x - y).abs() < 1e-5);
        }
    }
}

#[test]
fn test_popsize_rounds_down() {
    let results = LocalCluster::run(4, |node| {
        let opt = Optimizer::openai_es(
            node,
            Point::new(&START),
            Distance,
            Box::new(Sgd::new(0.01)),
            &settings(10),
        )
        .unwrap();
        let ws = opt.workspace();
        (ws.popsize(), ws.topology().folds, ws.fitness().fold_range())
    });
    for (rank, (popsize, folds, range)) in results.into_iter().enumerate() {
        assert_eq!(popsize, 8);
        assert_eq!(folds, 2);
        assert_eq!(range, 2 * rank..2 * rank + 2);
    }
}

#[test]
fn test_population_too_small() {
    let results = LocalCluster::run(3, |node| {
        Optimizer::genetic(
            node,
            Point::new(&START),
            Distance,
            &GaSettings {
                popsize: 2,
                ..GaSettings::default()
            },
        )
        .err()
    });
    for err in results {
        match err {
            Some(Error::Config(ConfigError::PopulationTooSmall { requested: 2, nodes: 3 })) => {}
            _ => panic!("expected PopulationTooSmall"),
        }
    }
}

fn snes_settings(es: EsSettings) -> SnesSettings {
    SnesSettings {
        es: es,
        lr_theta: 0.05,
        ..SnesSettings::default()
    }
}

fn run_snes<E: Environment>(env: E, settings: &SnesSettings, steps: usize) -> Vec<f32> {
    let mut opt = Optimizer::snes(env, Point::new(&START), Distance, settings).unwrap();
    for _ in 0..steps {
        opt.step(&(), &TARGET).unwrap();
    }
    opt.workspace().theta().to_vec()
}

#[test]
fn test_snes_agrees_across_nodes() {
    let s = snes_settings(settings(12));
    let thetas = LocalCluster::run(2, |node| run_snes(node, &s, 4));
    assert_eq!(thetas[0], thetas[1]);
}

#[test]
fn test_snes_orthogonal_updates_match_single_node() {
    let single = run_snes(SingleNode, &snes_settings(settings(12)), 4);
    let s = snes_settings(EsSettings {
        orthogonal_updates: true,
        ..settings(12)
    });
    // 5 parameters over 2 nodes: the second shard carries a padded column
    let thetas = LocalCluster::run(2, |node| run_snes(node, &s, 4));
    assert_ne!(single, START.to_vec());
    for theta in thetas {
        assert_eq!(theta, single);
    }
}

#[test]
fn test_snes_semi_updates_agree_across_nodes() {
    let s = snes_settings(EsSettings {
        semi_updates: true,
        ..settings(12)
    });
    let thetas = LocalCluster::run(3, |node| run_snes(node, &s, 4));
    assert_ne!(thetas[0], START.to_vec());
    assert_eq!(thetas[0], thetas[1]);
    assert_eq!(thetas[1], thetas[2]);
}

#[test]
fn test_ga_matches_single_node() {
    let s = GaSettings {
        popsize: 20,
        elite_ratio: 0.1,
        ..GaSettings::default()
    };
    let single = {
        let mut opt = Optimizer::genetic(SingleNode, Point::new(&START), Distance, &s).unwrap();
        for _ in 0..4 {
            opt.step(&(), &TARGET).unwrap();
        }
        opt.best_model().unwrap().x
    };
    let results = LocalCluster::run(4, |node| {
        let mut opt = Optimizer::genetic(node, Point::new(&START), Distance, &s).unwrap();
        for _ in 0..4 {
            opt.step(&(), &TARGET).unwrap();
        }
        opt.best_model().unwrap().x
    });
    for best in results {
        assert_eq!(best, single);
    }
}

#[test]
fn test_ga_data_parallel_matches_single_node() {
    let s = GaSettings {
        popsize: 20,
        elite_ratio: 0.1,
        ..GaSettings::default()
    };
    let single = {
        let mut opt = Optimizer::genetic(SingleNode, Point::new(&START), Distance, &s).unwrap();
        for _ in 0..4 {
            opt.step(&(), &TARGET).unwrap();
        }
        opt.best_model().unwrap().x
    };

    let ddp = GaSettings {
        data_parallel: true,
        ..s.clone()
    };
    // Same data everywhere, so the averaged fitness is the local fitness
    let results = LocalCluster::run(2, |node| {
        let mut opt = Optimizer::genetic(node, Point::new(&START), Distance, &ddp).unwrap();
        for _ in 0..4 {
            opt.step(&(), &TARGET).unwrap();
        }
        opt.best_model().unwrap().x
    });
    for best in results {
        assert_eq!(best, single);
    }
}
