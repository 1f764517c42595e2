//! Property-based tests for the algebraic facade functions (spec §8,
//! properties 4-6): union commutativity, projection, and inject round-trip.

use inputlayer::ast::Datalog;
use inputlayer::config::Config;
use inputlayer::predicate::Denotation;
use inputlayer::value::Boxed;
use inputlayer::{facts_2, inject_into_2, project_sym, union, Solver};
use proptest::prelude::*;
use std::collections::HashSet;

fn edb_pairs(relation: &str, rows: &[(i64, i64)]) -> Datalog {
    let d = Datalog::new();
    inject_into_2(relation, rows.iter().map(|&(a, b)| (Boxed::Int64(a), Boxed::Int64(b))), &d).unwrap()
}

fn pair_set(d: &Datalog, relation: &str) -> HashSet<(i64, i64)> {
    facts_2(relation, d)
        .into_iter()
        .map(|(a, b)| match (a, b) {
            (Boxed::Int64(x), Boxed::Int64(y)) => (x, y),
            other => panic!("unexpected tuple shape {other:?}"),
        })
        .collect()
}

proptest! {
    /// `solve(union(d1, d2)) = solve(union(d2, d1))` over rule-free EDB facts:
    /// with no rules, solving just passes the merged fact set through, so
    /// this reduces to set union being commutative.
    #[test]
    fn union_is_commutative(
        a in proptest::collection::vec((0i64..20, 0i64..20), 0..8),
        b in proptest::collection::vec((0i64..20, 0i64..20), 0..8),
    ) {
        let d1 = edb_pairs("edge", &a);
        let d2 = edb_pairs("edge", &b);

        let solver = Solver::new(Config::default());
        let forward = solver.solve(&union(d1.clone(), d2.clone())).unwrap();
        let backward = solver.solve(&union(d2, d1)).unwrap();

        prop_assert_eq!(pair_set(&forward.0, "edge"), pair_set(&backward.0, "edge"));
    }

    /// `facts(p, project_sym(p, d)) = facts(p, d)`; every other relation is
    /// dropped entirely.
    #[test]
    fn project_sym_is_exact_and_exclusive(
        edges in proptest::collection::vec((0i64..20, 0i64..20), 0..8),
        nodes in proptest::collection::vec(0i64..20, 0..8),
    ) {
        let mut d = edb_pairs("edge", &edges);
        d.declare("node", 1, Denotation::Relational);
        for n in &nodes {
            d.add_fact(inputlayer::ast::Fact { sym: "node".into(), values: vec![Boxed::Int64(*n)] });
        }

        let projected = project_sym("edge", &d);
        prop_assert_eq!(pair_set(&projected, "edge"), pair_set(&d, "edge"));
        prop_assert!(inputlayer::facts_1("node", &projected).is_empty());
    }

    /// `facts_n(p, inject_into_n(p, S)) = sort(S)` as a multiset.
    #[test]
    fn inject_then_extract_round_trips(rows in proptest::collection::vec((0i64..50, 0i64..50), 0..10)) {
        let d = Datalog::new();
        let boxed_rows: Vec<(Boxed, Boxed)> = rows.iter().map(|&(a, b)| (Boxed::Int64(a), Boxed::Int64(b))).collect();
        let injected = inject_into_2("edge", boxed_rows, &d).unwrap();

        let mut back: Vec<(i64, i64)> = facts_2("edge", &injected)
            .into_iter()
            .map(|(a, b)| match (a, b) {
                (Boxed::Int64(x), Boxed::Int64(y)) => (x, y),
                other => panic!("unexpected tuple shape {other:?}"),
            })
            .collect();
        let mut expected = rows;
        back.sort();
        expected.sort();
        prop_assert_eq!(back, expected);
    }
}
