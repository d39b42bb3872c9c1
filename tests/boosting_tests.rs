use synthboost::arena::Node;
use synthboost::cache::Split;
use synthboost::functions::{Function, FunctionKind};
use synthboost::learner::objective::ObjectiveKind;
use synthboost::learner::{
    BoostingConfig, BoostingLearner, PolicyConfig, RandomPolicy, RoundOutcome, StopReason, WeakLearnerKind,
};
use synthboost::model::{Model, Vote};
use synthboost::problem::{Example, Problem, Supervision};
use synthboost::samples::Value;
use synthboost::types::Type;

fn binary(points: &[(f64, bool)]) -> Vec<Example> {
    points
        .iter()
        .map(|(x, y)| Example::new(vec![Value::Scalar(*x)], Supervision::Binary(*y)))
        .collect()
}

#[test_log::test]
fn test_single_stump_separates_symmetric_points() {
    let problem = Problem::new().with_input("x", Type::Double);
    let config = BoostingConfig {
        max_steps: 2,
        max_iterations: 10,
        ..BoostingConfig::default()
    };
    let mut learner = BoostingLearner::new(problem, config).unwrap();
    learner
        .set_examples(Split::Training, &binary(&[(1.0, true), (-1.0, false), (2.0, true), (-2.0, false)]))
        .unwrap();

    let RoundOutcome::Accepted(round) = learner.round().unwrap() else { panic!("first round must be accepted") };
    let threshold = round.threshold.unwrap();
    assert!(threshold > -1.0 && threshold < 1.0);
    assert!(round.vote.as_scalar().unwrap() > 0.0);
    assert!((round.edge - 1.0).abs() < 1e-12);
    assert!(round.perfect);
    match learner.graph().node(round.condition) {
        Node::Function {
            function: Function::Stump { threshold: t },
            ..
        } => assert_eq!(*t, threshold),
        other => panic!("unexpected condition {:?}", other),
    }

    let predictions = learner.predictions(Split::Training);
    assert!(predictions[0] > 0.0 && predictions[2] > 0.0);
    assert!(predictions[1] < 0.0 && predictions[3] < 0.0);
}

#[test_log::test]
fn test_boosting_combines_weak_learners() {
    // positive iff x in [0, 4): no single stump gets it right
    let points: Vec<(f64, bool)> = (-4..8).map(|i| (i as f64, (0..4).contains(&i))).collect();
    let problem = Problem::new().with_input("x", Type::Double);
    let config = BoostingConfig {
        max_steps: 2,
        max_iterations: 20,
        ..BoostingConfig::default()
    };
    let mut learner = BoostingLearner::new(problem, config).unwrap();
    learner.set_examples(Split::Training, &binary(&points)).unwrap();
    let report = learner.run().unwrap();

    assert!(report.rounds.len() >= 2);
    // exponential loss is the product of the weight normalizers, each below one
    assert!(report.training_loss < 1.0);
    assert!(report.training_error.unwrap() <= 4.0 / 12.0);
    assert_eq!(learner.yields().len(), report.rounds.len());
    assert_eq!(learner.votes().len(), report.rounds.len());
    assert!(report
        .rounds
        .iter()
        .all(|r| r.vote.as_scalar().unwrap() > 0.0 || r.edge < 0.0));
}

#[test]
fn test_validation_loss_is_tracked() {
    let problem = Problem::new().with_input("x", Type::Double);
    let config = BoostingConfig {
        max_steps: 2,
        ..BoostingConfig::default()
    };
    let mut learner = BoostingLearner::new(problem, config).unwrap();
    learner
        .set_examples(Split::Training, &binary(&[(1.0, true), (-1.0, false), (2.0, true), (-2.0, false)]))
        .unwrap();
    learner
        .set_examples(Split::Validation, &binary(&[(0.5, true), (-3.0, false)]))
        .unwrap();
    let report = learner.run().unwrap();
    let validation_loss = report.rounds[0].validation_loss.unwrap();
    // both validation examples fall on the right side
    assert!(validation_loss < 1.0);
    assert_eq!(learner.predictions(Split::Validation).len(), 2);
}

#[test]
fn test_ranking_objective_orders_alternatives() {
    // lower cost should score higher; cost grows with x
    let examples: Vec<Example> = (0..12)
        .map(|i| {
            let group = i / 3;
            let x = (i % 3) as f64 + group as f64 * 0.1;
            Example::new(
                vec![Value::Scalar(x)],
                Supervision::Ranked {
                    group,
                    cost: (i % 3) as f64,
                },
            )
        })
        .collect();
    let problem = Problem::new().with_input("x", Type::Double);
    let config = BoostingConfig {
        max_steps: 2,
        max_iterations: 10,
        learning_rate: 0.5,
        objective: ObjectiveKind::PairwiseRanking,
        ..BoostingConfig::default()
    };
    let mut learner = BoostingLearner::new(problem, config).unwrap();
    learner.set_examples(Split::Training, &examples).unwrap();
    let report = learner.run().unwrap();
    assert!(!report.rounds.is_empty());
    assert!(report.training_loss < report.rounds[0].training_loss);
    assert!(report.rounds[0].edge < 0.0);
}

#[test]
fn test_supervision_must_match_objective() {
    let problem = Problem::new().with_input("x", Type::Double);
    let mut learner = BoostingLearner::new(problem, BoostingConfig::default()).unwrap();
    let examples = vec![Example::new(vec![Value::Scalar(1.0)], Supervision::Regression(2.0))];
    assert!(learner.set_examples(Split::Training, &examples).is_err());
}

#[test]
fn test_policy_search_finds_derived_feature() {
    // label depends on x - y only
    let examples: Vec<Example> = (0..16)
        .map(|i| {
            let x = (i % 4) as f64;
            let y = (i / 4) as f64;
            Example::new(
                vec![Value::Scalar(x), Value::Scalar(y)],
                Supervision::Binary(x > y),
            )
        })
        .collect();
    let problem = Problem::new()
        .with_input("x", Type::Double)
        .with_input("y", Type::Double)
        .with_function(FunctionKind::Greater);
    let config = BoostingConfig {
        max_steps: 4,
        max_iterations: 1,
        weak_learner: WeakLearnerKind::Exhaustive,
        policy: PolicyConfig { episodes_per_round: 200 },
        seed: 11,
        ..BoostingConfig::default()
    };
    let mut learner = BoostingLearner::new(problem, config)
        .unwrap()
        .with_policy(Box::new(RandomPolicy::new()));
    learner.set_examples(Split::Training, &examples).unwrap();
    let RoundOutcome::Accepted(round) = learner.round().unwrap() else { panic!("no weak learner") };
    assert_eq!(learner.graph().name(round.yield_node), "yield (x > y)");
    assert!(round.perfect);
}

#[test]
fn test_model_round_trips_through_a_file() {
    let mut problem = Problem::new();
    let color = problem.add_enumeration("color", &["red", "green", "blue"]);
    let problem = problem
        .with_input("x", Type::Double)
        .with_input("color", color)
        .with_functions(&[FunctionKind::EqualsLabel, FunctionKind::Or]);
    let examples: Vec<Example> = (0..30)
        .map(|i| {
            let x = (i % 10) as f64 - 4.5;
            let color = (i % 3) as u32;
            Example::new(
                vec![Value::Scalar(x), Value::Label(color)],
                Supervision::Binary(x > 2.0 || color == 1),
            )
        })
        .collect();
    let config = BoostingConfig {
        max_steps: 3,
        max_iterations: 15,
        ..BoostingConfig::default()
    };
    let mut learner = BoostingLearner::new(problem, config).unwrap();
    learner.set_examples(Split::Training, &examples).unwrap();
    let report = learner.run().unwrap();
    assert!(!report.rounds.is_empty());

    let model = learner.model().unwrap();
    assert_eq!(model.len(), report.rounds.len());
    let path = std::env::temp_dir().join(format!("synthboost-model-{}.json", std::process::id()));
    model.save(&path).unwrap();
    let loaded = Model::load(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, model);

    // the persisted model reproduces the in-graph ensemble
    let rows: Vec<Vec<Value>> = examples.iter().map(|e| e.inputs.clone()).collect();
    let from_model = loaded.predict_rows(&rows).unwrap();
    let from_graph = learner.predictions(Split::Training);
    for (a, b) in from_model.iter().zip(&from_graph) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[test]
fn test_stop_reason_is_reported() {
    let problem = Problem::new().with_input("x", Type::Double);
    let config = BoostingConfig {
        max_steps: 2,
        max_iterations: 0,
        ..BoostingConfig::default()
    };
    let mut learner = BoostingLearner::new(problem, config).unwrap();
    learner
        .set_examples(Split::Training, &binary(&[(1.0, true), (-1.0, false)]))
        .unwrap();
    let report = learner.run().unwrap();
    assert_eq!(report.stop, StopReason::IterationBudget);
    assert!(report.rounds.is_empty());
    assert!(learner.model().unwrap().is_empty());
}

#[test_log::test]
fn test_bandit_skips_unsplittable_constant_yields() {
    // a single feature with every seventh label flipped: no round separates it
    let examples: Vec<Example> = (0..60)
        .map(|i| {
            let x = i as f64 - 29.5;
            Example::new(vec![Value::Scalar(x)], Supervision::Binary((x > 0.0) != (i % 7 == 3)))
        })
        .collect();
    let problem = Problem::new()
        .with_input("x", Type::Double)
        .with_constant(Type::Double, Value::Scalar(1.0))
        .with_function(FunctionKind::Add);
    let config = BoostingConfig {
        max_steps: 4,
        max_iterations: 10,
        weak_learner: WeakLearnerKind::Bandit,
        seed: 3,
        ..BoostingConfig::default()
    };
    let mut learner = BoostingLearner::new(problem, config).unwrap();
    learner.set_examples(Split::Training, &examples).unwrap();
    let report = learner.run().unwrap();
    assert_eq!((report.stop, report.rounds.len()), (StopReason::IterationBudget, 10));
    for round in &report.rounds {
        assert!(round.threshold.is_some());
        assert!(!learner.graph().name(round.yield_node).starts_with("yield 1"));
    }
}

#[test_log::test]
fn test_multi_class_boosting_separates_three_classes() {
    // class 0 below -2, class 1 in [-2, 2), class 2 from 2 up
    let examples: Vec<Example> = (0..12)
        .map(|i| {
            let x = i as f64 - 5.5;
            let class = if x < -2.0 { 0 } else if x < 2.0 { 1 } else { 2 };
            Example::new(vec![Value::Scalar(x)], Supervision::Class(class))
        })
        .collect();
    let problem = Problem::new()
        .with_input("x", Type::Double)
        .with_labels(&["low", "mid", "high"]);
    let config = BoostingConfig {
        max_steps: 2,
        max_iterations: 2,
        objective: ObjectiveKind::MultiClass,
        ..BoostingConfig::default()
    };
    let mut learner = BoostingLearner::new(problem, config).unwrap();
    learner.set_examples(Split::Training, &examples).unwrap();
    let report = learner.run().unwrap();

    assert_eq!(report.stop, StopReason::IterationBudget);
    assert_eq!(report.rounds.len(), 2);
    let mut thresholds: Vec<f64> = report.rounds.iter().filter_map(|r| r.threshold).collect();
    thresholds.sort_by(f64::total_cmp);
    assert_eq!(thresholds, vec![-2.0, 2.0]);
    assert_eq!(report.training_error, Some(0.0));
    assert!(report.rounds.iter().all(|r| matches!(&r.vote, Vote::Labels(v) if v.len() == 3)));
    assert_eq!(learner.predictions(Split::Training).len(), 36);

    let model = learner.model().unwrap();
    assert_eq!(model.labels, vec!["low", "mid", "high"]);
    let path = std::env::temp_dir().join(format!("synthboost-multiclass-{}.json", std::process::id()));
    model.save(&path).unwrap();
    let loaded = Model::load(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, model);
    for example in &examples {
        let Supervision::Class(class) = example.supervision else { unreachable!() };
        assert_eq!(loaded.classify(&example.inputs).unwrap(), class);
    }
}
