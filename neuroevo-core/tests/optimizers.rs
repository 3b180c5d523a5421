mod common;

use common::{dot, Distance, Linear, Point};
use ne_core::error::{ConfigError, Error};
use ne_core::optimizer::Strategy;
use ne_core::update::Sgd;
use ne_core::{EsSettings, GaSettings, Optimizer, Phase, SingleNode, SnesSettings};

fn es_settings(popsize: usize) -> EsSettings {
    EsSettings {
        popsize: popsize,
        sigma: 0.1,
        ..EsSettings::default()
    }
}

#[test]
fn test_openai_es_single_step() {
    let start = [1f32, -2., 0.5];
    let target = [0f32; 3];
    let mut opt = Optimizer::openai_es(
        SingleNode,
        Point::new(&start),
        Distance,
        Box::new(Sgd::new(0.01)),
        &es_settings(10),
    )
    .unwrap();
    assert_eq!(opt.phase(), Phase::Constructed);

    opt.eval_theta(&(), &target).unwrap();
    let before = opt.loss();

    opt.step(&(), &target).unwrap();
    assert_eq!(opt.phase(), Phase::Ready);
    assert_eq!(opt.generation(), 1);

    let ws = opt.workspace();
    assert_eq!(ws.fitness().global().len(), 10);
    assert_eq!(ws.theta().len(), 3);
    assert!(ws.theta() != &start[..]);
    assert!(opt.stats().get("gradient_norm").unwrap() > 0.);

    opt.eval_theta(&(), &target).unwrap();
    assert!(opt.loss() < before, "{} !< {}", opt.loss(), before);
}

#[test]
fn test_openai_es_converges() {
    let target = [0.3f32, -0.7, 1.1, 0.];
    let mut opt = Optimizer::openai_es(
        SingleNode,
        Point::new(&[0.; 4]),
        Distance,
        Box::new(Sgd::new(0.05)),
        &es_settings(20),
    )
    .unwrap();
    opt.eval_theta(&(), &target).unwrap();
    let before = opt.loss();
    for _ in 0..100 {
        opt.step(&(), &target).unwrap();
    }
    opt.eval_theta(&(), &target).unwrap();
    assert!(opt.loss() < 0.25 * before);

    // The canonical model follows theta
    let best = opt.best_model().unwrap();
    assert_eq!(&best.x[..], opt.workspace().theta());
}

#[test]
fn test_openai_es_ascends_linear_objective() {
    let c = [0.5f32, -1., 2.];
    let mut opt = Optimizer::openai_es(
        SingleNode,
        Point::new(&[0.; 3]),
        Linear,
        Box::new(Sgd::new(0.1)),
        &es_settings(8),
    )
    .unwrap();
    for _ in 0..3 {
        let before = dot(opt.workspace().theta(), &c);
        opt.step(&(), &c).unwrap();
        assert!(dot(opt.workspace().theta(), &c) > before);
    }
}

#[test]
fn test_snes_starts_at_zero_and_ascends() {
    let c = [1f32, 2., -1., 0.5];
    let settings = SnesSettings {
        es: es_settings(12),
        lr_theta: 0.1,
        ..SnesSettings::default()
    };
    let mut opt = Optimizer::snes(SingleNode, Point::new(&[3.; 4]), Linear, &settings).unwrap();
    assert_eq!(opt.workspace().theta(), &[0.; 4][..]);
    assert_eq!(opt.best_model().unwrap().x, vec![0.; 4]);

    opt.step(&(), &c).unwrap();
    assert!(dot(opt.workspace().theta(), &c) > 0.);
    assert_eq!(opt.best_model().unwrap().x, opt.workspace().theta().to_vec());

    match opt.strategy() {
        Strategy::Snes(snes) => {
            assert_eq!(snes.sigma().len(), 4);
            assert!(snes.sigma().iter().any(|s| (s - 0.1).abs() > 1e-6));
            assert!(opt.stats().get("sigma_mean").is_some());
        }
        _ => panic!("expected SNES"),
    }
}

#[test]
fn test_ga_elites() {
    let target = [0f32; 5];
    let settings = GaSettings {
        popsize: 20,
        elite_ratio: 0.1,
        ..GaSettings::default()
    };
    let mut opt = Optimizer::genetic(SingleNode, Point::new(&[1.; 5]), Distance, &settings).unwrap();
    for _ in 0..3 {
        opt.step(&(), &target).unwrap();
    }

    let fitness = opt.workspace().fitness().global().to_vec();
    let mut sorted = fitness.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    match opt.strategy() {
        Strategy::Genetic(ga) => {
            assert_eq!(ga.num_elites(), 2);
            let idx = ga.elite_indices();
            assert_eq!(idx.len(), 2);
            assert_eq!(fitness[idx[0]], sorted[0]);
            assert_eq!(fitness[idx[1]], sorted[1]);
            for (e, i) in idx.iter().enumerate() {
                assert_eq!(ga.elite(e), ga.member(*i));
            }
            // Every elite is at least as good as every other member
            let worst_elite = fitness[idx[1]];
            for (i, f) in fitness.iter().enumerate() {
                if !idx.contains(&i) {
                    assert!(worst_elite <= *f);
                }
            }
        }
        _ => panic!("expected GA"),
    }

    // Central estimate is the best elite
    opt.eval_theta(&(), &target).unwrap();
    assert_eq!(opt.loss(), sorted[0]);
}

#[test]
fn test_ga_improves() {
    let target = [0.5f32, -0.5, 0.25];
    let settings = GaSettings {
        popsize: 30,
        sigma: 0.05,
        elite_ratio: 0.2,
        ..GaSettings::default()
    };
    let mut opt = Optimizer::genetic(SingleNode, Point::new(&[0.; 3]), Distance, &settings).unwrap();
    opt.eval_theta(&(), &target).unwrap();
    let before = opt.loss();
    let mut last = before;
    for _ in 0..20 {
        opt.step(&(), &target).unwrap();
        opt.eval_theta(&(), &target).unwrap();
        // Elitism: the best member never gets worse
        assert!(opt.loss() <= last);
        last = opt.loss();
    }
    assert!(last < before);
}

#[test]
fn test_non_finite_fitness_propagates() {
    let target = [std::f32::NAN; 2];
    let mut opt = Optimizer::openai_es(
        SingleNode,
        Point::new(&[0.; 2]),
        Distance,
        Box::new(Sgd::new(0.01)),
        &es_settings(4),
    )
    .unwrap();
    opt.step(&(), &target).unwrap();
    assert!(opt.loss().is_nan());
}

#[test]
fn test_config_errors() {
    let mut s = es_settings(10);
    s.data_parallel = true;
    s.orthogonal_updates = true;
    let err = Optimizer::openai_es(
        SingleNode,
        Point::new(&[0.; 2]),
        Distance,
        Box::new(Sgd::new(0.01)),
        &s,
    )
    .err()
    .unwrap();
    match err {
        Error::Config(ConfigError::IncompatibleParallelism(_, _)) => {}
        e => panic!("unexpected error {}", e),
    }

    let ga = GaSettings {
        popsize: 5,
        elite_ratio: 0.1,
        ..GaSettings::default()
    };
    match Optimizer::genetic(SingleNode, Point::new(&[0.; 2]), Distance, &ga).err() {
        Some(Error::Config(ConfigError::NoElites { popsize: 5, .. })) => {}
        _ => panic!("expected NoElites"),
    }

    match Optimizer::genetic(SingleNode, Point::new(&[]), Distance, &GaSettings::default()).err() {
        Some(Error::Config(ConfigError::EmptyModel)) => {}
        _ => panic!("expected EmptyModel"),
    }
}
