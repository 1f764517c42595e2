//! End-to-end scenarios over the public `Solver` facade.

use inputlayer::ast::builders::{AtomBuilder, RuleBuilder};
use inputlayer::ast::{Datalog, Fact};
use inputlayer::config::Config;
use inputlayer::predicate::Denotation;
use inputlayer::value::Boxed;
use inputlayer::{facts_2, Solver};
use std::collections::HashSet;

fn edge(x: i64, y: i64) -> Fact {
    Fact { sym: "edge".into(), values: vec![Boxed::Int64(x), Boxed::Int64(y)] }
}

fn pairs(model: &Datalog, relation: &str) -> HashSet<(i64, i64)> {
    facts_2(relation, model)
        .into_iter()
        .map(|(a, b)| match (a, b) {
            (Boxed::Int64(x), Boxed::Int64(y)) => (x, y),
            other => panic!("unexpected tuple shape {other:?}"),
        })
        .collect()
}

/// Edge = {(1,2),(2,3),(3,4)}, Path(x,y) :- Edge(x,y). Path(x,z) :- Path(x,y),Edge(y,z).
#[test]
fn transitive_closure() {
    let mut d = Datalog::new();
    d.declare("edge", 2, Denotation::Relational);
    d.declare("path", 2, Denotation::Relational);
    d.add_fact(edge(1, 2));
    d.add_fact(edge(2, 3));
    d.add_fact(edge(3, 4));
    d.add_rule(
        RuleBuilder::new("path")
            .head_var("x")
            .head_var("y")
            .atom(AtomBuilder::new("edge").var("x").var("y").edb())
            .build(),
    );
    d.add_rule(
        RuleBuilder::new("path")
            .head_var("x")
            .head_var("z")
            .atom(AtomBuilder::new("path").var("x").var("y"))
            .atom(AtomBuilder::new("edge").var("y").var("z").edb())
            .build(),
    );

    let solver = Solver::new(Config::default());
    let model = solver.solve(&d).unwrap();

    let expected: HashSet<(i64, i64)> = [(1, 2), (1, 3), (1, 4), (2, 3), (2, 4), (3, 4)].into_iter().collect();
    assert_eq!(pairs(&model.0, "path"), expected);
}

/// Same program, plus `Edge(x,y) :- Edge(y,x).` — every path now also runs
/// backwards, giving 12 tuples total.
#[test]
fn undirected_transitive_closure() {
    let mut d = Datalog::new();
    d.declare("edge", 2, Denotation::Relational);
    d.declare("path", 2, Denotation::Relational);
    d.add_fact(edge(1, 2));
    d.add_fact(edge(2, 3));
    d.add_fact(edge(3, 4));
    d.add_rule(
        RuleBuilder::new("edge")
            .head_var("x")
            .head_var("y")
            .atom(AtomBuilder::new("edge").var("y").var("x").edb())
            .build(),
    );
    d.add_rule(
        RuleBuilder::new("path")
            .head_var("x")
            .head_var("y")
            .atom(AtomBuilder::new("edge").var("x").var("y").edb())
            .build(),
    );
    d.add_rule(
        RuleBuilder::new("path")
            .head_var("x")
            .head_var("z")
            .atom(AtomBuilder::new("path").var("x").var("y"))
            .atom(AtomBuilder::new("edge").var("y").var("z").edb())
            .build(),
    );

    let solver = Solver::new(Config::default());
    let model = solver.solve(&d).unwrap();

    assert_eq!(pairs(&model.0, "path").len(), 12);
}

/// Person = {Child1, Parent1}, Parent = {(Child1, Parent1)},
/// HasParent(c) :- Parent(c,_). Orphan(c) :- Person(c), not HasParent(c).
/// Only Parent1 has nobody listed as their own parent, so Orphan = {Parent1}.
#[test]
fn stratified_negation_finds_orphans() {
    let mut d = Datalog::new();
    d.declare("person", 1, Denotation::Relational);
    d.declare("parent", 2, Denotation::Relational);
    d.declare("has_parent", 1, Denotation::Relational);
    d.declare("orphan", 1, Denotation::Relational);

    d.add_fact(Fact { sym: "person".into(), values: vec![Boxed::str("Child1")] });
    d.add_fact(Fact { sym: "person".into(), values: vec![Boxed::str("Parent1")] });
    d.add_fact(Fact { sym: "parent".into(), values: vec![Boxed::str("Child1"), Boxed::str("Parent1")] });

    d.add_rule(
        RuleBuilder::new("has_parent")
            .head_var("c")
            .atom(AtomBuilder::new("parent").var("c").wild().edb())
            .build(),
    );
    d.add_rule(
        RuleBuilder::new("orphan")
            .head_var("c")
            .atom(AtomBuilder::new("person").var("c").edb())
            .atom(AtomBuilder::new("has_parent").var("c").negated())
            .build(),
    );

    let solver = Solver::new(Config::default());
    let model = solver.solve(&d).unwrap();

    let orphans: Vec<Boxed> = inputlayer::facts_1("orphan", &model.0).into_iter().map(|(c,)| c).collect();
    assert_eq!(orphans, vec![Boxed::str("Parent1")]);
}

#[test]
fn config_load_falls_back_to_defaults_without_a_config_file() {
    let config = Config::load().unwrap();
    assert_eq!(config.index_arity, 64);
}
