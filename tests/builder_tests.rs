use proptest::prelude::*;
use synthboost::arena::{Graph, Node};
use synthboost::builder::{enumerate_completions, Action, BuilderState};
use synthboost::cache::Split;
use synthboost::functions::{Function, FunctionKind};
use synthboost::problem::Problem;
use synthboost::samples::Value;
use synthboost::search_space::TypeSearchSpace;
use synthboost::types::Type;

fn problem() -> Problem {
    let mut p = Problem::new();
    let color = p.add_enumeration("color", &["red", "green"]);
    p.with_input("x", Type::Double)
        .with_input("y", Type::Double)
        .with_input("c", color)
        .with_constant(Type::Double, Value::Scalar(1.0))
        .with_functions(&[
            FunctionKind::Add,
            FunctionKind::Sub,
            FunctionKind::Greater,
            FunctionKind::Not,
            FunctionKind::And,
            FunctionKind::EqualsLabel,
        ])
}

fn rows() -> Vec<Vec<Value>> {
    vec![
        vec![Value::Scalar(0.5), Value::Scalar(2.0), Value::Label(0)],
        vec![Value::Scalar(-1.0), Value::Missing, Value::Label(1)],
        vec![Value::Scalar(3.0), Value::Scalar(1.0), Value::Missing],
    ]
}

#[test]
fn test_equal_structures_share_one_cache() {
    let p = problem();
    let mut g = Graph::new(&p, usize::MAX).unwrap();
    g.set_examples(Split::Training, &rows()).unwrap();
    let space = TypeSearchSpace::new(&p, 5).unwrap();
    let (x, y) = (g.node_at(0), g.node_at(1));

    // first trajectory builds x - y, then backtracks
    let mut b = BuilderState::new(&space);
    let mut undos = Vec::new();
    for action in [Action::Push(x), Action::Push(y), Action::Apply(Function::Sub)] {
        undos.push(b.perform(&mut g, &space, &action).unwrap());
    }
    let first = *b.stack().last().unwrap();
    g.compute(first, Split::Training);
    while let Some(undo) = undos.pop() {
        b.undo(&mut g, undo);
    }
    assert!(!g.contains(first));

    // second trajectory reaches the same expression through a different prefix
    let mut b = BuilderState::new(&space);
    for action in [
        Action::Push(x),
        Action::Push(y),
        Action::Apply(Function::Greater),
    ] {
        b.perform(&mut g, &space, &action).unwrap();
    }
    let mut b2 = BuilderState::new(&space);
    for action in [Action::Push(x), Action::Push(y), Action::Apply(Function::Sub)] {
        b2.perform(&mut g, &space, &action).unwrap();
    }
    let second = *b2.stack().last().unwrap();
    let direct = g.intern(Node::function(Function::Sub, &[x, y])).unwrap();

    assert_eq!(first, second);
    assert_eq!(first, direct);
    let a = g.cache(first).unwrap();
    let b = g.cache(second).unwrap();
    assert!(std::ptr::eq(a, b));
    assert_eq!(a.samples(Split::Training).unwrap().get(0), Value::Scalar(-1.5));
}

#[test]
fn test_completions_leave_graph_untouched() {
    let p = problem();
    let mut g = Graph::new(&p, usize::MAX).unwrap();
    let space = TypeSearchSpace::new(&p, 4).unwrap();
    let before = g.nodes().to_vec();
    let completions = enumerate_completions(&mut g, &space).unwrap();
    assert_eq!(g.nodes(), before.as_slice());
    let names: Vec<&str> = completions.iter().map(|c| g.name(*c)).collect();
    assert!(names.contains(&"yield (x > y)"));
    assert!(names.contains(&"yield (c == #1)"));
    assert!(names.contains(&"yield !(c == #0)"));
    // x + 1 has a constant argument but is not folded: x is not constant
    assert!(names.contains(&"yield (x + 1)"));
    assert!(!names.iter().any(|n| n.starts_with("yield c")));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn transitions_undo_to_identical_state(choices in prop::collection::vec(any::<usize>(), 1..6)) {
        let p = problem();
        let mut g = Graph::new(&p, usize::MAX).unwrap();
        let space = TypeSearchSpace::new(&p, 5).unwrap();
        let mut b = BuilderState::new(&space);
        let graph_before = g.nodes().to_vec();
        let builder_before = b.clone();

        let mut undos = Vec::new();
        let mut snapshots = Vec::new();
        for choice in choices {
            let actions = b.available_actions(&g, &space);
            if actions.is_empty() {
                break;
            }
            snapshots.push((b.clone(), g.nodes().to_vec()));
            let action = actions[choice % actions.len()].clone();
            undos.push(b.perform(&mut g, &space, &action).unwrap());
        }
        while let Some(undo) = undos.pop() {
            b.undo(&mut g, undo);
            let (builder, nodes) = snapshots.pop().unwrap();
            prop_assert_eq!(&b, &builder);
            prop_assert_eq!(g.nodes(), nodes.as_slice());
        }
        prop_assert_eq!(b, builder_before);
        prop_assert_eq!(g.nodes(), graph_before.as_slice());
    }
}
