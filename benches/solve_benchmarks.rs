use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use inputlayer::ast::builders::{AtomBuilder, RuleBuilder};
use inputlayer::config::Config;
use inputlayer::predicate::Denotation;
use inputlayer::value::Boxed;
use inputlayer::{ast::Datalog, Solver};

/// A chain graph `0 -> 1 -> ... -> n` plus the two-rule transitive-closure
/// program over it, so `path` grows roughly with `n^2` facts.
fn chain_transitive_closure(n: i64) -> Datalog {
    let mut d = Datalog::new();
    d.declare("edge", 2, Denotation::Relational);
    d.declare("path", 2, Denotation::Relational);
    for i in 0..n {
        d.add_fact(inputlayer::ast::Fact { sym: "edge".into(), values: vec![Boxed::Int64(i), Boxed::Int64(i + 1)] });
    }
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
            .atom(AtomBuilder::new("edge").var("x").var("y").edb())
            .atom(AtomBuilder::new("path").var("y").var("z"))
            .build(),
    );
    d
}

fn bench_transitive_closure(c: &mut Criterion) {
    let mut group = c.benchmark_group("transitive_closure");
    for n in [8, 32, 128] {
        let d = chain_transitive_closure(n);
        let solver = Solver::new(Config::default());
        group.bench_with_input(BenchmarkId::from_parameter(n), &d, |b, d| {
            b.iter(|| solver.solve(d).unwrap());
        });
    }
    group.finish();
}

fn bench_join_optimizer_toggle(c: &mut Criterion) {
    let d = chain_transitive_closure(64);
    let mut group = c.benchmark_group("join_optimizer");

    let with_optimizer = Solver::new(Config::default());
    group.bench_function("enabled", |b| b.iter(|| with_optimizer.solve(&d).unwrap()));

    let without_optimizer = Solver::new(Config { disable_join_optimizer: true, ..Config::default() });
    group.bench_function("disabled", |b| b.iter(|| without_optimizer.solve(&d).unwrap()));

    group.finish();
}

criterion_group!(benches, bench_transitive_closure, bench_join_optimizer_toggle);
criterion_main!(benches);
