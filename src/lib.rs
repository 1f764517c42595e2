//! # InputLayer
//!
//! A Datalog solver: compiles stratified Horn-clause programs with lattice
//! attributes into a relational algebra machine and evaluates them
//! semi-naively to their minimal model.
//!
//! ```text
//! Datalog (AST)
//!   `-- compiler::compile            -> Ram (+ PositionAssignment)
//!         `-- simplify::simplify
//!               `-- hoist::hoist
//!                     `-- join_optimizer::reorder  (profiler-informed, optional)
//!                           `-- provenance::augment (optional)
//!                                 `-- index_selection::select_indexes -> IndexCatalogue
//!                                       `-- lowering::lower -> Lowered (ERam)
//!                                             `-- interpreter::Interpreter::run -> Vec<OrderedIndex>
//!                                                   `-- marshal -> Model
//! ```
//!
//! [`Solver`] is the only entry point an embedding layer needs: it owns a
//! [`config::Config`] and drives every phase above in order, handing the
//! caller back a [`Model`] (or a [`Provenance`], which additionally carries
//! what [`prov_of`] needs to reconstruct a derivation).

pub mod ast;
pub mod boxing;
pub mod compiler;
pub mod config;
pub mod error;
pub mod hoist;
pub mod index_selection;
pub mod interpreter;
pub mod join_optimizer;
pub mod lowering;
pub mod ordered_index;
pub mod precedence;
pub mod predicate;
pub mod profiler;
pub mod provenance;
pub mod ram;
pub mod simplify;
pub mod value;

use crate::ast::{BodyAtom, BodyLiteral, Datalog, Fact, FunctionRegistry, Rule};
use crate::boxing::BoxingTable;
use crate::config::Config;
use crate::error::{SolveError, SolveResult};
use crate::lowering::IndexDescriptor;
use crate::ordered_index::OrderedIndex;
use crate::precedence::{PrecedenceGraph, Stratifier, StrataMap};
use crate::predicate::{Denotation, PositionAssignment, PredSym, PredicateRegistry, Variant};
use crate::profiler::{CountingSink, JoinProfile, ProfilerSettings};
use crate::provenance::ProvenanceStore;
use crate::value::{Boxed, Tuple};
use interpreter::Interpreter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A solved (or seed-fact) program: same shape as [`Datalog`], but by
/// convention carries no rules — everything in it is already ground. Kept
/// as a newtype rather than a parallel struct so every relation/fact/
/// function API already written for `Datalog` (declare, add_fact, ...)
/// works on a `Model` without duplication.
#[derive(Clone)]
pub struct Model(pub Datalog);

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Model {
    pub fn facts(&self) -> &[Fact] {
        &self.0.facts
    }
}

/// Merges two Datalog programs: relation declarations are deduplicated by
/// name (first writer wins on conflict), facts and rules are concatenated,
/// and function registries are merged (spec §6, `union`).
impl std::ops::Add for Datalog {
    type Output = Datalog;

    fn add(self, rhs: Datalog) -> Datalog {
        let mut out = self;
        for r in rhs.relations {
            if !out.relations.iter().any(|e| e.name == r.name) {
                out.relations.push(r);
            }
        }
        out.facts.extend(rhs.facts);
        out.rules.extend(rhs.rules);
        out.functions.merge_from(&rhs.functions);
        out
    }
}

/// `Model ⊕ Model`: merges per relation, joining lattice values with the
/// relation's `⊔` rather than concatenating them (spec §6).
impl std::ops::Add for Model {
    type Output = Model;

    fn add(self, rhs: Model) -> Model {
        let mut functions = self.0.functions.clone();
        functions.merge_from(&rhs.0.functions);

        let mut relations = self.0.relations.clone();
        for r in &rhs.0.relations {
            if !relations.iter().any(|e| e.name == r.name) {
                relations.push(r.clone());
            }
        }

        let mut facts = self.0.facts;
        for incoming in rhs.0.facts {
            let denotation = relations.iter().find(|r| r.name == incoming.sym).map(|r| &r.denotation);
            match denotation {
                Some(Denotation::Latticenal { join, .. }) => {
                    let key_arity = incoming.values.len().saturating_sub(1);
                    let existing = facts
                        .iter_mut()
                        .find(|f| f.sym == incoming.sym && f.values[..key_arity] == incoming.values[..key_arity]);
                    match existing {
                        Some(e) => {
                            let joined = functions.call_func(join, &[e.values[key_arity].clone(), incoming.values[key_arity].clone()]);
                            e.values[key_arity] = joined;
                        }
                        None => facts.push(incoming),
                    }
                }
                _ => {
                    if !facts.iter().any(|f| f.sym == incoming.sym && f.values == incoming.values) {
                        facts.push(incoming);
                    }
                }
            }
        }

        Model(Datalog { relations, facts, rules: Vec::new(), functions })
    }
}

/// `Datalog ⊕ Model`: the model's relations/facts become seed facts the
/// program compiles against, its (empty) rule list contributing nothing
/// (spec §6, "Join(Model, Datalog)").
impl std::ops::Add<Model> for Datalog {
    type Output = Datalog;

    fn add(self, rhs: Model) -> Datalog {
        self + rhs.0
    }
}

/// `Model ⊕ Datalog`, symmetric to the above.
impl std::ops::Add<Datalog> for Model {
    type Output = Datalog;

    fn add(self, rhs: Datalog) -> Datalog {
        self.0 + rhs
    }
}

/// `union(a, b)`: thin wrapper around `a + b` so call sites read the way
/// spec §6 names them rather than requiring an operator.
pub fn union<A, B>(a: A, b: B) -> <A as std::ops::Add<B>>::Output
where
    A: std::ops::Add<B>,
{
    a + b
}

/// Extracts the declaration and facts of relation `p` alone (spec §6).
pub fn project_sym(p: &str, d: &Datalog) -> Datalog {
    let mut out = Datalog::new();
    out.functions = d.functions.clone();
    if let Some(rel) = d.relations.iter().find(|r| r.name.as_ref() == p) {
        out.declare(rel.name.clone(), rel.arity, rel.denotation.clone());
        out.facts = d.facts.iter().filter(|f| f.sym.as_ref() == p).cloned().collect();
    }
    out
}

/// Renames every predicate not in `keep` by appending its declaration
/// index (`name#i`), leaving whitelisted predicates untouched (spec §6).
/// Deterministic in the order `d.relations` is declared, not randomized —
/// two calls on the same `d` always produce the same renaming.
pub fn rename(keep: &[&str], d: &Datalog) -> Datalog {
    let renamed: HashMap<&str, Arc<str>> = d
        .relations
        .iter()
        .enumerate()
        .filter(|(_, r)| !keep.contains(&r.name.as_ref()))
        .map(|(i, r)| (r.name.as_ref(), Arc::from(format!("{}#{i}", r.name))))
        .collect();
    let sym = |name: &Arc<str>| -> Arc<str> { renamed.get(name.as_ref()).cloned().unwrap_or_else(|| name.clone()) };

    let mut out = Datalog::new();
    out.functions = d.functions.clone();
    for r in &d.relations {
        out.declare(sym(&r.name), r.arity, r.denotation.clone());
    }
    for f in &d.facts {
        out.add_fact(Fact { sym: sym(&f.sym), values: f.values.clone() });
    }
    for rule in &d.rules {
        out.add_rule(Rule {
            head_sym: sym(&rule.head_sym),
            head_terms: rule.head_terms.clone(),
            body: rule
                .body
                .iter()
                .map(|lit| match lit {
                    BodyLiteral::Atom(a) => BodyLiteral::Atom(BodyAtom { sym: sym(&a.sym), ..a.clone() }),
                    other => other.clone(),
                })
                .collect(),
        });
    }
    out
}

/// Shared arity/type validation for the `inject_into_n` family: `p`'s
/// declared arity (if already present in `d`) must match, and every row
/// must carry exactly `arity` values.
fn inject_rows(p: &str, arity: usize, rows: Vec<Vec<Boxed>>, d: &Datalog) -> SolveResult<Datalog> {
    if let Some(existing) = d.relations.iter().find(|r| r.name.as_ref() == p) {
        if existing.arity != arity {
            return Err(SolveError::ArityMismatch { relation: p.to_string(), expected: existing.arity, got: arity });
        }
    }
    for row in &rows {
        if row.len() != arity {
            return Err(SolveError::ArityMismatch { relation: p.to_string(), expected: arity, got: row.len() });
        }
    }
    let mut out = d.clone();
    let denotation = d.denotation_of(p).cloned().unwrap_or(Denotation::Relational);
    out.declare(p, arity, denotation);
    for row in rows {
        out.add_fact(Fact { sym: p.into(), values: row });
    }
    Ok(out)
}

macro_rules! n_tuple_ops {
    ($inject:ident, $facts:ident, $n:expr; $($slot:ident),+) => {
        /// Ingests a sequence of tuples as facts of predicate `p`, returning
        /// `d` with those facts (and, if new, `p`'s declaration) added.
        pub fn $inject(p: &str, rows: impl IntoIterator<Item = ($(n_tuple_ops!(@ty $slot)),+,)>, d: &Datalog) -> SolveResult<Datalog> {
            let rows: Vec<Vec<Boxed>> = rows.into_iter().map(|($($slot),+,)| vec![$($slot),+]).collect();
            inject_rows(p, $n, rows, d)
        }

        /// Extracts every fact of predicate `p` as a vector of tuples.
        pub fn $facts(p: &str, d: &Datalog) -> Vec<($(n_tuple_ops!(@ty $slot)),+,)> {
            d.facts
                .iter()
                .filter(|f| f.sym.as_ref() == p)
                .map(|f| {
                    let mut values = f.values.iter().cloned();
                    ($(n_tuple_ops!(@next values $slot)),+,)
                })
                .collect()
        }
    };
    (@ty $slot:ident) => { Boxed };
    (@next $values:ident $slot:ident) => { $values.next().unwrap_or(Boxed::NoValue) };
}

/// Extracts every fact of the nullary predicate `p` as a vector of units
/// (one per matching fact) — the N=0 case `facts_n` handles separately
/// since a macro repetition needs at least one element.
pub fn facts_0(p: &str, d: &Datalog) -> Vec<()> {
    d.facts.iter().filter(|f| f.sym.as_ref() == p).map(|_| ()).collect()
}

n_tuple_ops!(inject_into_1, facts_1, 1; c0);
n_tuple_ops!(inject_into_2, facts_2, 2; c0, c1);
n_tuple_ops!(inject_into_3, facts_3, 3; c0, c1, c2);
n_tuple_ops!(inject_into_4, facts_4, 4; c0, c1, c2, c3);
n_tuple_ops!(inject_into_5, facts_5, 5; c0, c1, c2, c3, c4);
n_tuple_ops!(inject_into_6, facts_6, 6; c0, c1, c2, c3, c4, c5);
n_tuple_ops!(inject_into_7, facts_7, 7; c0, c1, c2, c3, c4, c5, c6);
n_tuple_ops!(inject_into_8, facts_8, 8; c0, c1, c2, c3, c4, c5, c6, c7);
n_tuple_ops!(inject_into_9, facts_9, 9; c0, c1, c2, c3, c4, c5, c6, c7, c8);
n_tuple_ops!(inject_into_10, facts_10, 10; c0, c1, c2, c3, c4, c5, c6, c7, c8, c9);
n_tuple_ops!(inject_into_11, facts_11, 11; c0, c1, c2, c3, c4, c5, c6, c7, c8, c9, c10);
n_tuple_ops!(inject_into_12, facts_12, 12; c0, c1, c2, c3, c4, c5, c6, c7, c8, c9, c10, c11);
n_tuple_ops!(inject_into_13, facts_13, 13; c0, c1, c2, c3, c4, c5, c6, c7, c8, c9, c10, c11, c12);
n_tuple_ops!(inject_into_14, facts_14, 14; c0, c1, c2, c3, c4, c5, c6, c7, c8, c9, c10, c11, c12, c13);
n_tuple_ops!(inject_into_15, facts_15, 15; c0, c1, c2, c3, c4, c5, c6, c7, c8, c9, c10, c11, c12, c13, c14);

/// Debug-dump collaborator (spec §2/§6): the solver calls `dump` with a
/// textual rendering of the RAM program after every compiler phase when
/// `enable_debugging` is set. Object-safe so a `Solver` can hold one as a
/// trait object; defaults to [`NoopDebugSink`].
pub trait DebugSink: Send + Sync {
    fn dump(&self, phase: &str, text: &str);
}

pub struct NoopDebugSink;

impl DebugSink for NoopDebugSink {
    fn dump(&self, _phase: &str, _text: &str) {}
}

/// Appends each dump to `path` as `=== {phase} ===\n{text}\n`.
pub struct FileDebugSink {
    path: PathBuf,
}

impl FileDebugSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileDebugSink { path: path.into() }
    }
}

impl DebugSink for FileDebugSink {
    fn dump(&self, phase: &str, text: &str) {
        use std::io::Write;
        let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&self.path) else {
            return;
        };
        let _ = writeln!(file, "=== {phase} ===\n{text}\n");
    }
}

/// What a provenance-requested solve needs to keep around after
/// `Interpreter::run` returns, beyond the marshalled [`Model`]: the raw
/// (still depth/rule-number-tagged) indexes `prov_of` scans.
struct Artifacts {
    registry: PredicateRegistry,
    descriptors: Vec<IndexDescriptor>,
    indexes: Vec<OrderedIndex>,
}

/// Result of [`Solver::solve_with_provenance`]: a solved [`Model`] plus
/// enough of the raw interpreter state to answer [`prov_of`] queries
/// without re-running the solve.
pub struct Provenance {
    pub model: Model,
    datalog: Datalog,
    registry: PredicateRegistry,
    descriptors: Vec<IndexDescriptor>,
    indexes: Vec<OrderedIndex>,
}

/// Adapts the raw post-solve indexes to [`provenance::ProvenanceStore`]:
/// `rows` scans the `Full` variant's index and splits off its trailing
/// `(depth, rule_no)` columns.
struct IndexStore<'a> {
    descriptors: &'a [IndexDescriptor],
    indexes: &'a [OrderedIndex],
}

impl ProvenanceStore for IndexStore<'_> {
    fn rows(&self, relation: &str) -> Vec<(Tuple, i64, i64)> {
        let Some(slot) = self
            .descriptors
            .iter()
            .position(|d| d.pred.name.as_ref() == relation && d.pred.variant == Variant::Full)
        else {
            return Vec::new();
        };
        let mut out = Vec::new();
        self.indexes[slot].for_each(|tuple, _payload| {
            let n = tuple.arity();
            let key = Tuple::new(tuple.as_slice()[..n - 2].to_vec());
            out.push((key, tuple.get(n - 2), tuple.get(n - 1)));
        });
        out
    }
}

/// Implemented by anything [`prov_of`] can reconstruct a proof tree from.
/// A plain [`Model`] (solved without provenance) always rejects the
/// request — only a [`Provenance`] (from `solve_with_provenance`, or from
/// a plain `solve` with `Config::use_provenance` set) carries the
/// depth/rule-number columns reconstruction needs.
pub trait ProvenanceSource {
    fn prov_of(&self, goal: &Tuple, predicate: &str) -> SolveResult<Option<Vec<(PredSym, Tuple)>>>;
}

impl ProvenanceSource for Model {
    fn prov_of(&self, _goal: &Tuple, _predicate: &str) -> SolveResult<Option<Vec<(PredSym, Tuple)>>> {
        Err(SolveError::ProvenanceNotRequested)
    }
}

impl ProvenanceSource for Provenance {
    fn prov_of(&self, goal: &Tuple, predicate: &str) -> SolveResult<Option<Vec<(PredSym, Tuple)>>> {
        let store = IndexStore { descriptors: &self.descriptors, indexes: &self.indexes };
        let pred = self.registry.full(predicate);
        Ok(provenance::reconstruct(&store, &self.datalog, &pred, predicate, goal).map(|t| t.flatten()))
    }
}

/// `prov_of(goal, p, d) -> Option<Vec<(PredSym, Tuple)>>` (spec §6):
/// pre-order flattened proof tree for `p`'s fact keyed by `goal`.
pub fn prov_of(goal: &Tuple, predicate: &str, source: &impl ProvenanceSource) -> SolveResult<Option<Vec<(PredSym, Tuple)>>> {
    source.prov_of(goal, predicate)
}

/// Orchestrates every compiler/interpreter phase behind one call.
/// Everything it builds — indexes, env arrays, profile buffers — is owned
/// by the `Interpreter` value created inside `execute` and dropped at the
/// end of that call (spec §5, "scoped acquisition").
pub struct Solver {
    config: Config,
    debug: Box<dyn DebugSink>,
}

impl Solver {
    pub fn new(config: Config) -> Self {
        let debug: Box<dyn DebugSink> = if config.enable_debugging {
            Box::new(FileDebugSink::new(config.debug_file_name.clone()))
        } else {
            Box::new(NoopDebugSink)
        };
        Solver { config, debug }
    }

    /// Overrides the debug sink `new` picked from `config.enable_debugging`.
    pub fn with_debug_sink(mut self, sink: impl DebugSink + 'static) -> Self {
        self.debug = Box::new(sink);
        self
    }

    /// Solves `datalog`, additionally computing provenance when
    /// `config.use_provenance` is set (spec §6).
    pub fn solve(&self, datalog: &Datalog) -> SolveResult<Model> {
        let (model, _) = self.execute(datalog, self.config.use_provenance)?;
        Ok(model)
    }

    /// Solves `datalog` with provenance unconditionally on, regardless of
    /// `config.use_provenance`.
    pub fn solve_with_provenance(&self, datalog: &Datalog) -> SolveResult<Provenance> {
        let (model, artifacts) = self.execute(datalog, true)?;
        let artifacts = match artifacts {
            Some(a) => a,
            None => crate::error::bug!("provenance-requested solve produced no artifacts"),
        };
        Ok(Provenance {
            model,
            datalog: datalog.clone(),
            registry: artifacts.registry,
            descriptors: artifacts.descriptors,
            indexes: artifacts.indexes,
        })
    }

    fn execute(&self, datalog: &Datalog, want_provenance: bool) -> SolveResult<(Model, Option<Artifacts>)> {
        let _span = tracing::info_span!("solve", provenance = want_provenance).entered();

        let max_ids = datalog.relations.len().max(1) as u64;
        let mut registry = PredicateRegistry::new(max_ids);
        for rel in &datalog.relations {
            registry.register(rel.name.clone(), rel.arity, rel.denotation.clone());
        }

        let graph = {
            let _s = tracing::debug_span!("precedence").entered();
            PrecedenceGraph::from_datalog(datalog)
        };
        let strata = {
            let _s = tracing::debug_span!("stratify").entered();
            Stratifier::stratify(&graph)?
        };

        let (mut ram, positions) = {
            let _s = tracing::debug_span!("compile").entered();
            compiler::compile(datalog, &registry, &strata)
        };
        self.debug.dump("compile", &format!("{ram:#?}"));

        ram = simplify::simplify(ram);
        self.debug.dump("simplify", &format!("{ram:#?}"));

        ram = hoist::hoist(ram);
        self.debug.dump("hoist", &format!("{ram:#?}"));

        if !self.config.disable_join_optimizer {
            if let Some(profile) = self.profile(datalog, &strata, max_ids) {
                ram = join_optimizer::reorder(ram, &profile, &registry);
                self.debug.dump("reorder", &format!("{ram:#?}"));
            }
        }

        if want_provenance {
            ram = provenance::augment(ram)?;
            self.debug.dump("provenance", &format!("{ram:#?}"));
        }

        let catalogue = {
            let _s = tracing::debug_span!("index_selection").entered();
            index_selection::select_indexes(&ram, &registry)
        };
        let lowered = lowering::lower(&ram, &registry, &catalogue);

        let boxing = BoxingTable::new();
        let interpreter =
            Interpreter::new(&lowered, &registry, &positions, &boxing, &datalog.functions, self.config.index_arity, self.config.par_level);
        let descriptors = interpreter.descriptors().to_vec();
        let indexes = {
            let _s = tracing::debug_span!("interpret").entered();
            interpreter.run(&lowered)
        };

        let marshalled = marshal(&registry, &positions, &boxing, &descriptors, &indexes, &datalog.functions);
        if self.config.enable_debug_print_facts {
            self.debug.dump("facts", &format!("{:#?}", marshalled.facts));
        }
        let model = Model(marshalled);

        if want_provenance {
            Ok((model, Some(Artifacts { registry, descriptors, indexes })))
        } else {
            Ok((model, None))
        }
    }

    /// Samples EDB facts and runs an instrumented copy of the program over
    /// them to build a [`JoinProfile`] for [`join_optimizer::reorder`].
    /// Returns `None` when the program has too few facts to profile
    /// (spec §4.10) — the caller then keeps the compiled join order as-is.
    fn profile(&self, datalog: &Datalog, strata: &StrataMap, max_ids: u64) -> Option<JoinProfile> {
        let _span = tracing::debug_span!("profile").entered();
        let settings = ProfilerSettings {
            fact_lower_bound: self.config.profiler_fact_lower_bound,
            seed: self.config.profiler_seed,
            minimum_facts: self.config.profiler_minimum_facts,
            discrimination: self.config.profiler_discrimination,
        };
        let sampled = profiler::sample_facts(datalog, &settings)?;

        let mut sample_registry = PredicateRegistry::new(max_ids);
        for rel in &sampled.relations {
            sample_registry.register(rel.name.clone(), rel.arity, rel.denotation.clone());
        }
        let (ram, positions) = compiler::compile(&sampled, &sample_registry, strata);
        let ram = hoist::hoist(simplify::simplify(ram));
        let instrumented = profiler::instrument(ram);
        let catalogue = index_selection::select_indexes(&instrumented, &sample_registry);
        let lowered = lowering::lower(&instrumented, &sample_registry, &catalogue);

        let boxing = BoxingTable::new();
        let sink = CountingSink::new();
        let interpreter = Interpreter::new(
            &lowered,
            &sample_registry,
            &positions,
            &boxing,
            &sampled.functions,
            self.config.index_arity,
            self.config.par_level,
        )
        .with_profile_sink(&sink);
        let _ = interpreter.run(&lowered);
        Some(sink.into_profile())
    }
}

/// Reads the solved indexes back into a plain [`Datalog`] of facts: the
/// mirror image of `compiler::compile`'s `Insert` step. Provenance's
/// trailing depth/rule-number columns, if present, are dropped here —
/// they live on in [`Provenance`]'s raw indexes for [`prov_of`], not in
/// the public-facing model.
fn marshal(
    registry: &PredicateRegistry,
    positions: &PositionAssignment,
    boxing: &BoxingTable,
    descriptors: &[IndexDescriptor],
    indexes: &[OrderedIndex],
    functions: &FunctionRegistry,
) -> Datalog {
    let mut out = Datalog::new();
    out.functions = functions.clone();
    for name in registry.names() {
        let denotation = registry.denotation(name).clone();
        let arity = registry.arity(name);
        out.declare(name, arity, denotation.clone());

        let pred = registry.full(name);
        let Some(slot) = descriptors.iter().position(|d| d.pred == pred) else { continue };
        let base_id = pred.base_id(registry.max_ids());
        let is_lattice = denotation.is_lattice();

        indexes[slot].for_each(|tuple, payload| {
            let mut values: Vec<Boxed> = (0..arity).map(|c| boxing.box_with(tuple.get(c), positions.column(base_id, c))).collect();
            if is_lattice {
                values.push(payload.clone());
            }
            out.add_fact(Fact { sym: Arc::from(name), values });
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{AtomBuilder, RuleBuilder};
    use crate::predicate::Denotation;

    fn transitive_closure() -> Datalog {
        let mut d = Datalog::new();
        d.declare("edge", 2, Denotation::Relational);
        d.declare("path", 2, Denotation::Relational);
        d.add_fact(Fact { sym: "edge".into(), values: vec![Boxed::Int64(1), Boxed::Int64(2)] });
        d.add_fact(Fact { sym: "edge".into(), values: vec![Boxed::Int64(2), Boxed::Int64(3)] });
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

    #[test]
    fn solver_computes_transitive_closure() {
        let d = transitive_closure();
        let solver = Solver::new(Config::default());
        let model = solver.solve(&d).unwrap();
        let pairs: Vec<(Boxed, Boxed)> = facts_2("path", &model.0);
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn solve_with_provenance_reconstructs_a_proof() {
        let d = transitive_closure();
        let solver = Solver::new(Config::default());
        let provenance = solver.solve_with_provenance(&d).unwrap();
        let goal = Tuple::new(vec![1, 3]);
        let proof = prov_of(&goal, "path", &provenance).unwrap();
        assert!(proof.is_some());
        assert!(proof.unwrap().len() > 1);
    }

    #[test]
    fn model_without_provenance_rejects_prov_of() {
        let d = transitive_closure();
        let solver = Solver::new(Config::default());
        let model = solver.solve(&d).unwrap();
        let goal = Tuple::new(vec![1, 3]);
        let err = prov_of(&goal, "path", &model).unwrap_err();
        assert!(matches!(err, SolveError::ProvenanceNotRequested));
    }

    #[test]
    fn project_sym_keeps_only_the_named_relation() {
        let d = transitive_closure();
        let projected = project_sym("edge", &d);
        assert_eq!(projected.relations.len(), 1);
        assert_eq!(projected.facts.len(), 2);
        assert!(projected.rules.is_empty());
    }

    #[test]
    fn rename_leaves_whitelisted_predicates_alone() {
        let d = transitive_closure();
        let renamed = rename(&["edge"], &d);
        assert!(renamed.relations.iter().any(|r| r.name.as_ref() == "edge"));
        assert!(renamed.relations.iter().any(|r| r.name.as_ref() == "path#1"));
    }

    #[test]
    fn inject_and_extract_round_trip() {
        let d = Datalog::new();
        let rows = vec![(Boxed::Int64(1), Boxed::Int64(2)), (Boxed::Int64(3), Boxed::Int64(4))];
        let injected = inject_into_2("edge", rows, &d).unwrap();
        let back: Vec<(Boxed, Boxed)> = facts_2("edge", &injected);
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn inject_rejects_arity_mismatch_against_declared_relation() {
        let mut d = Datalog::new();
        d.declare("edge", 3, Denotation::Relational);
        let rows = vec![(Boxed::Int64(1), Boxed::Int64(2))];
        let err = inject_into_2("edge", rows, &d).unwrap_err();
        assert!(matches!(err, SolveError::ArityMismatch { expected: 3, got: 2, .. }));
    }

    #[test]
    fn union_of_two_datalogs_concatenates_facts() {
        let mut a = Datalog::new();
        a.declare("edge", 2, Denotation::Relational);
        a.add_fact(Fact { sym: "edge".into(), values: vec![Boxed::Int64(1), Boxed::Int64(2)] });
        let mut b = Datalog::new();
        b.declare("edge", 2, Denotation::Relational);
        b.add_fact(Fact { sym: "edge".into(), values: vec![Boxed::Int64(2), Boxed::Int64(3)] });
        let merged = union(a, b);
        assert_eq!(merged.facts.len(), 2);
    }

    #[test]
    fn noop_debug_sink_does_nothing() {
        let sink = NoopDebugSink;
        sink.dump("phase", "text");
    }
}
