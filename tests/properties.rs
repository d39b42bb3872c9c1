//! Property-based tests for the boosting primitives.

use proptest::prelude::*;
use synthboost::arena::NodeId;
use synthboost::learner::edge::stump_predictions;
use synthboost::learner::{find_best_threshold, BanditPool, CorrelationEdge, DiscreteEdge, EdgeCalculator, WeightVector};

/// Every candidate threshold evaluated from scratch.
fn brute_force(calculator: &mut dyn EdgeCalculator, values: &[f64]) -> Option<(f64, f64)> {
    let mut distinct: Vec<f64> = values.to_vec();
    distinct.sort_by(|a, b| a.total_cmp(b));
    distinct.dedup();
    let mut best: Option<(f64, f64)> = None;
    for pair in distinct.windows(2) {
        let threshold = pair[0] + (pair[1] - pair[0]) / 2.0;
        calculator.set_predictions(&stump_predictions(values, threshold));
        let edge = calculator.compute_edge();
        if best.map_or(true, |(_, e)| edge.abs() > e.abs() + 1e-12) {
            best = Some((threshold, edge));
        }
    }
    best
}

fn sorted(values: &[f64]) -> Vec<(u32, f64)> {
    let mut sorted: Vec<(u32, f64)> = values.iter().enumerate().map(|(i, x)| (i as u32, *x)).collect();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    sorted
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn weights_renormalize(
        cases in prop::collection::vec((any::<bool>(), -3.0f64..3.0), 1..50),
    ) {
        let labels: Vec<f64> = cases.iter().map(|(y, _)| if *y { 1.0 } else { -1.0 }).collect();
        let contributions: Vec<f64> = cases.iter().map(|(_, f)| *f).collect();
        let mut weights = WeightVector::uniform(labels.len());
        let before = weights.update(&labels, &contributions);
        prop_assert!(before > 0.0);
        prop_assert!((weights.sum() - 1.0).abs() < 1e-9);
        prop_assert!(weights.as_slice().iter().all(|w| *w >= 0.0));
    }

    #[test]
    fn discrete_threshold_matches_brute_force(
        cases in prop::collection::vec((0i32..8, any::<bool>(), 0.01f64..1.0), 2..40),
    ) {
        let values: Vec<f64> = cases.iter().map(|(x, _, _)| *x as f64).collect();
        let mass: f64 = cases.iter().map(|(_, _, w)| w).sum();
        let signal: Vec<f64> = cases
            .iter()
            .map(|(_, y, w)| if *y { w / mass } else { -w / mass })
            .collect();

        let mut calculator = DiscreteEdge::new();
        calculator.initialize(&signal);
        let fast = find_best_threshold(&mut calculator, &sorted(&values), values.len());
        let mut reference = DiscreteEdge::new();
        reference.initialize(&signal);
        let slow = brute_force(&mut reference, &values);

        match (fast, slow) {
            (None, None) => {}
            (Some((_, e1)), Some((_, e2))) => prop_assert!((e1.abs() - e2.abs()).abs() < 1e-9),
            other => prop_assert!(false, "mismatch {:?}", other),
        }
    }

    #[test]
    fn correlation_threshold_matches_brute_force(
        cases in prop::collection::vec((-5i32..5, -2.0f64..2.0), 2..40),
    ) {
        let values: Vec<f64> = cases.iter().map(|(x, _)| *x as f64).collect();
        let signal: Vec<f64> = cases.iter().map(|(_, r)| *r).collect();

        let mut calculator = CorrelationEdge::new();
        calculator.initialize(&signal);
        let fast = find_best_threshold(&mut calculator, &sorted(&values), values.len());
        let mut reference = CorrelationEdge::new();
        reference.initialize(&signal);
        let slow = brute_force(&mut reference, &values);

        match (fast, slow) {
            (None, None) => {}
            (Some((t, e1)), Some((_, e2))) => {
                prop_assert!((e1.abs() - e2.abs()).abs() < 1e-9);
                // the reported threshold reproduces the reported edge
                reference.set_predictions(&stump_predictions(&values, t));
                prop_assert!((reference.compute_edge() - e1).abs() < 1e-9);
            }
            other => prop_assert!(false, "mismatch {:?}", other),
        }
    }

    #[test]
    fn unplayed_arms_are_played_first(
        arms in 2u32..12,
        rewards in prop::collection::vec(-1.0f64..2.0, 1..30),
    ) {
        let mut pool = BanditPool::new(1.0);
        let candidates: Vec<NodeId> = (0..arms).map(NodeId).collect();
        pool.add_arms(&candidates);
        let mut played = Vec::new();
        for r in &rewards {
            let unplayed_before = pool.arms().filter(|a| a.played() == 0).count();
            let index = pool.play_arm_with_highest_index(|_| Ok(*r)).unwrap().unwrap();
            if unplayed_before > 0 {
                // the arm had never been played
                prop_assert_eq!(pool.arm(index).played(), 1);
                prop_assert!(!played.contains(&index));
            }
            played.push(index);
        }
    }
}
