//! # Compiler (Semi-naïve Code Generation)
//!
//! Lowers a stratified [`Datalog`] program into the high-level [`Ram`] AST
//! (spec §4.6), grounded on the teacher's `sip_rewriting` module's idiom of
//! emitting one rule-copy per delta-substituted atom.
//!
//! ```text
//! for each stratum (in evaluation order):
//!   Phase A: nested Search over Full, once per rule           -> New
//!   MergeInto(New,Full); MergeInto(New,Delta); Purge(New)
//!   Until(Delta empty):
//!     Phase B: one rule-copy per positive in-stratum atom,
//!              that atom reads Delta, the rest read Full       -> New
//!     MergeInto(New,Full); Swap(New,Delta); Purge(New)
//! ```
//!
//! Guards attached directly to a `Search` node here play the role of the
//! separate `If` wrapper the spec's hoisting section describes folding
//! into a `Query` (spec §4.8) — functionally equivalent, simpler to rewrite
//! in place; see `DESIGN.md`.

use crate::ast::{BodyAtom, BodyLiteral, Datalog, Fixity, HeadTerm, Polarity, Rule, Term};
use crate::error::bug;
use crate::predicate::{PositionAssignment, PositionBuilder, PredSym, PredicateRegistry, UnifiedPosition, Variant};
use crate::precedence::StrataMap;
use crate::ram::{BoolExpr, ProjectTerm, Ram, RamTerm, RowVar};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initial,
    Incremental,
}

struct CompileCtx<'a> {
    registry: &'a PredicateRegistry,
    strata: &'a StrataMap,
    next_row_var: u32,
    positions: PositionBuilder,
}

impl<'a> CompileCtx<'a> {
    fn fresh(&mut self) -> RowVar {
        let rv = RowVar(self.next_row_var);
        self.next_row_var += 1;
        rv
    }

    /// Unified position for column `col` of `sym`'s `Full` relation — the
    /// canonical identity shared by every variant (`Full`/`Delta`/`New`)
    /// of that relation, per spec §4.3.
    fn relation_pos(&mut self, sym: &str, col: usize) -> UnifiedPosition {
        let base_id = self.registry.full(sym).id;
        self.positions.column_pos(base_id, col)
    }
}

fn term_to_ramterm(term: &Term, env: &HashMap<Arc<str>, RamTerm>) -> RamTerm {
    match term {
        Term::Var(v) => env
            .get(v)
            .unwrap_or_else(|| bug!("unbound variable {v} referenced after safety check passed"))
            .clone(),
        Term::Lit(b) => RamTerm::Const(b.clone()),
        Term::Wild => bug!("wildcard term used in a value position"),
    }
}

fn ramterm_to_projectterm(term: &RamTerm) -> ProjectTerm {
    match term {
        RamTerm::Attr(rv, c) => ProjectTerm::Attr(*rv, *c),
        RamTerm::Const(b) => ProjectTerm::Const(b.clone()),
        RamTerm::App(f, args) => ProjectTerm::App(f.clone(), args.iter().map(ramterm_to_projectterm).collect()),
        RamTerm::LatticeValue(rv) => ProjectTerm::LatticeValue(*rv),
    }
}

fn head_term_to_project(term: &HeadTerm, env: &HashMap<Arc<str>, RamTerm>) -> ProjectTerm {
    match term {
        HeadTerm::Var(v) => ramterm_to_projectterm(
            env.get(v).unwrap_or_else(|| bug!("unbound head variable {v} after safety check passed")),
        ),
        HeadTerm::Lit(b) => ProjectTerm::Const(b.clone()),
        HeadTerm::App(f, args) => ProjectTerm::App(
            f.clone(),
            args.iter()
                .map(|a| {
                    ramterm_to_projectterm(
                        env.get(a).unwrap_or_else(|| bug!("unbound app arg {a} after safety check passed")),
                    )
                })
                .collect(),
        ),
    }
}

/// Binds/guards one occurrence of `atom`'s terms against `rv`, updating
/// `env` with first-occurrence bindings and returning guards for repeats,
/// literal equality, and (for `Latticenal` atoms) splitting the trailing
/// term off as the lattice-payload read rather than a tuple column.
///
/// Also allocates/unifies `pos_env`'s entries against this atom's column
/// positions — the lattice value slot is excluded, since lattice payloads
/// are carried as raw `Boxed` and never boxed/positioned (`DESIGN.md`).
fn compile_atom_occurrence(
    ctx: &mut CompileCtx,
    atom: &BodyAtom,
    rv: RowVar,
    env: &mut HashMap<Arc<str>, RamTerm>,
    pos_env: &mut HashMap<Arc<str>, UnifiedPosition>,
) -> Vec<BoolExpr> {
    let mut guards = Vec::new();
    let is_lattice = atom.denotation.is_lattice();
    let n = atom.terms.len();
    for (i, term) in atom.terms.iter().enumerate() {
        let is_value_slot = is_lattice && i + 1 == n;
        let current = if is_value_slot { RamTerm::LatticeValue(rv) } else { RamTerm::Attr(rv, i) };
        let pos = if is_value_slot { None } else { Some(ctx.relation_pos(&atom.sym, i)) };
        match term {
            Term::Wild => {}
            Term::Lit(lit) => guards.push(BoolExpr::Eq(current, RamTerm::Const(lit.clone()))),
            Term::Var(v) => {
                if let Some(existing) = env.get(v) {
                    guards.push(BoolExpr::Eq(current, existing.clone()));
                    if let (Some(pos), Some(&existing_pos)) = (pos, pos_env.get(v)) {
                        ctx.positions.union(existing_pos, pos);
                    }
                } else {
                    env.insert(v.clone(), current);
                    if let Some(pos) = pos {
                        pos_env.insert(v.clone(), pos);
                    }
                }
            }
        }
    }
    guards
}

fn negative_args(
    ctx: &mut CompileCtx,
    atom: &BodyAtom,
    env: &HashMap<Arc<str>, RamTerm>,
    pos_env: &HashMap<Arc<str>, UnifiedPosition>,
) -> Vec<RamTerm> {
    atom.terms
        .iter()
        .enumerate()
        .map(|(i, t)| match t {
            Term::Var(v) => {
                let term = env.get(v).cloned().unwrap_or_else(|| bug!("negative atom var {v} unbound"));
                let pos = ctx.relation_pos(&atom.sym, i);
                if let Some(&existing) = pos_env.get(v) {
                    ctx.positions.union(existing, pos);
                }
                term
            }
            Term::Lit(b) => RamTerm::Const(b.clone()),
            Term::Wild => bug!("wildcard in negative atom is not meaningful as a membership test argument"),
        })
        .collect()
}

struct RuleCtx<'a> {
    rule: &'a Rule,
    /// Index into `Datalog::rules`; carried through to the emitted
    /// `Project` as a `Comment("rule#N")` marker so a later provenance
    /// augmentation pass (`crate::provenance`) can recover which rule
    /// fired without re-deriving it from the (by-then reordered) RAM.
    rule_index: usize,
    target: PredSym,
    stratum: (usize, usize),
    phase: Phase,
    /// Which 0-based positive-in-stratum-atom occurrence (in body order)
    /// should read `Delta` for this rule-copy; `None` in `Phase::Initial`.
    delta_site: Option<usize>,
}

fn is_idb_in_stratum(atom: &BodyAtom, strata: &StrataMap, stratum: (usize, usize)) -> bool {
    atom.fixity == Fixity::Idb && strata.get(atom.sym.as_ref()) == Some(&stratum)
}

/// Binds each head term's column position on `target`, unifying it with
/// the body variable's position where the term is a plain variable
/// reference. Literal/`App` head terms still get the target column's
/// position allocated (even though there's nothing on the body side to
/// union with) so the interpreter always has somewhere to unbox into.
fn bind_head_positions(ctx: &mut CompileCtx, rc: &RuleCtx, pos_env: &HashMap<Arc<str>, UnifiedPosition>) {
    for (i, term) in rc.rule.head_terms.iter().enumerate() {
        let target_pos = ctx.relation_pos(&rc.target.name, i);
        if let HeadTerm::Var(v) = term {
            if let Some(&source) = pos_env.get(v) {
                ctx.positions.union(source, target_pos);
            }
        }
    }
}

fn build_body(
    ctx: &mut CompileCtx,
    rc: &RuleCtx,
    body: &[BodyLiteral],
    idx: usize,
    env: &mut HashMap<Arc<str>, RamTerm>,
    pos_env: &mut HashMap<Arc<str>, UnifiedPosition>,
    idb_counter: &mut usize,
) -> Ram {
    if idx == body.len() {
        bind_head_positions(ctx, rc, pos_env);
        let terms = rc.rule.head_terms.iter().map(|t| head_term_to_project(t, env)).collect();
        let project = Ram::Project { terms, into: rc.target.clone() };
        return Ram::seq(vec![Ram::Comment(format!("rule#{}", rc.rule_index).into()), project]);
    }
    match &body[idx] {
        BodyLiteral::Atom(a) if a.polarity == Polarity::Positive => {
            let variant = if rc.phase == Phase::Incremental && is_idb_in_stratum(a, ctx.strata, rc.stratum) {
                let site = *idb_counter;
                *idb_counter += 1;
                if Some(site) == rc.delta_site { Variant::Delta } else { Variant::Full }
            } else {
                Variant::Full
            };
            let rv = ctx.fresh();
            let guards = compile_atom_occurrence(ctx, a, rv, env, pos_env);
            let rel = ctx.registry.variant(&a.sym, variant);
            let body_ram = build_body(ctx, rc, body, idx + 1, env, pos_env, idb_counter);
            Ram::Search { rv, rel, guards, body: Box::new(body_ram) }
        }
        BodyLiteral::Atom(a) => {
            // Negative: always tests the already-finalized Full store.
            let args = negative_args(ctx, a, env, pos_env);
            let full = ctx.registry.full(&a.sym);
            let guard = BoolExpr::not_member_of(full, args);
            let body_ram = build_body(ctx, rc, body, idx + 1, env, pos_env, idb_counter);
            Ram::If { guards: vec![guard], body: Box::new(body_ram) }
        }
        BodyLiteral::Guard(g) => {
            let args = g.args.iter().map(|t| term_to_ramterm(t, env)).collect();
            let guard = BoolExpr::Guard(g.func.clone(), args);
            let body_ram = build_body(ctx, rc, body, idx + 1, env, pos_env, idb_counter);
            Ram::If { guards: vec![guard], body: Box::new(body_ram) }
        }
        BodyLiteral::Functional(f) => {
            let args = f.in_vars.iter().map(|v| env.get(v).cloned().unwrap_or_else(|| bug!("functional arg {v} unbound"))).collect();
            let rv = ctx.fresh();
            for (i, ov) in f.out_vars.iter().enumerate() {
                env.insert(ov.clone(), RamTerm::Attr(rv, i));
                // Functional outputs aren't backed by any relation column,
                // so they get a dedicated position recorded against the
                // row variable directly (spec §4.3's non-column identity
                // sites) rather than derived from a `(base_pred, col)` key.
                let pos = ctx.positions.fresh();
                ctx.positions.bind_row_var_attr(rv.0, i, pos);
                pos_env.insert(ov.clone(), pos);
            }
            let body_ram = build_body(ctx, rc, body, idx + 1, env, pos_env, idb_counter);
            Ram::Functional { out_rv: rv, arity: f.out_vars.len(), func: f.func.clone(), args, body: Box::new(body_ram) }
        }
    }
}

fn count_idb_in_stratum(rule: &Rule, strata: &StrataMap, stratum: (usize, usize)) -> usize {
    rule.body
        .iter()
        .filter(|lit| matches!(lit, BodyLiteral::Atom(a) if a.polarity == Polarity::Positive && is_idb_in_stratum(a, strata, stratum)))
        .count()
}

fn compile_rule(ctx: &mut CompileCtx, rule: &Rule, rule_index: usize, stratum: (usize, usize), phase: Phase) -> Vec<Ram> {
    let target = ctx.registry.new_variant(&rule.head_sym);
    match phase {
        Phase::Initial => {
            let rc = RuleCtx { rule, rule_index, target, stratum, phase, delta_site: None };
            let mut env = HashMap::new();
            let mut pos_env = HashMap::new();
            vec![build_body(ctx, &rc, &rule.body, 0, &mut env, &mut pos_env, &mut 0)]
        }
        Phase::Incremental => {
            let n = count_idb_in_stratum(rule, ctx.strata, stratum);
            (0..n)
                .map(|site| {
                    let rc = RuleCtx { rule, rule_index, target: target.clone(), stratum, phase, delta_site: Some(site) };
                    let mut env = HashMap::new();
                    let mut pos_env = HashMap::new();
                    build_body(ctx, &rc, &rule.body, 0, &mut env, &mut pos_env, &mut 0)
                })
                .collect()
        }
    }
}

/// Every distinct `(pseudo, within)` stratum key, in evaluation order:
/// sorted by pseudo-stratum index, and within that, consecutive strata
/// (already independent by construction) grouped for a `Par`.
fn ordered_strata(strata: &StrataMap) -> Vec<Vec<(usize, usize)>> {
    let mut keys: Vec<(usize, usize)> = strata.values().copied().collect::<std::collections::HashSet<_>>().into_iter().collect();
    keys.sort_unstable();
    let mut groups: Vec<Vec<(usize, usize)>> = Vec::new();
    for key in keys {
        match groups.last_mut() {
            Some(last) if last.last().map(|k| k.0) == Some(key.0) => last.push(key),
            _ => groups.push(vec![key]),
        }
    }
    groups
}

fn rules_in_stratum<'a>(datalog: &'a Datalog, strata: &StrataMap, stratum: (usize, usize)) -> Vec<(usize, &'a Rule)> {
    datalog
        .rules
        .iter()
        .enumerate()
        .filter(|(_, r)| strata.get(r.head_sym.as_ref()) == Some(&stratum))
        .collect()
}

fn predicates_in_stratum(strata: &StrataMap, stratum: (usize, usize)) -> Vec<String> {
    strata.iter().filter(|(_, &v)| v == stratum).map(|(k, _)| k.clone()).collect()
}

fn compile_stratum(ctx: &mut CompileCtx, datalog: &Datalog, stratum: (usize, usize)) -> Option<Ram> {
    let rules = rules_in_stratum(datalog, ctx.strata, stratum);
    if rules.is_empty() {
        return None;
    }
    let preds = predicates_in_stratum(ctx.strata, stratum);

    let mut phase_a = Vec::new();
    for &(idx, rule) in &rules {
        phase_a.extend(compile_rule(ctx, rule, idx, stratum, Phase::Initial));
    }
    let mut after_a = phase_a;
    for name in &preds {
        after_a.push(Ram::MergeInto { from: ctx.registry.new_variant(name), into: ctx.registry.full(name) });
    }
    for name in &preds {
        after_a.push(Ram::MergeInto { from: ctx.registry.new_variant(name), into: ctx.registry.delta(name) });
    }
    for name in &preds {
        after_a.push(Ram::Purge { rel: ctx.registry.new_variant(name) });
    }

    let mut phase_b = Vec::new();
    for &(idx, rule) in &rules {
        phase_b.extend(compile_rule(ctx, rule, idx, stratum, Phase::Incremental));
    }
    // TODO(#4719): fold this MergeInto into the rule copy that produces
    // `New` for latticenal relations, instead of merging element-by-element
    // through `New` every iteration. Left as a straight copy-loop for now.
    for name in &preds {
        phase_b.push(Ram::MergeInto { from: ctx.registry.new_variant(name), into: ctx.registry.full(name) });
    }
    for name in &preds {
        phase_b.push(Ram::Swap { a: ctx.registry.new_variant(name), b: ctx.registry.delta(name) });
    }
    for name in &preds {
        phase_b.push(Ram::Purge { rel: ctx.registry.new_variant(name) });
    }

    let until_empty: Vec<PredSym> = preds.iter().map(|n| ctx.registry.delta(n)).collect();
    after_a.push(Ram::Until { until_empty, body: Box::new(Ram::seq(phase_b)) });
    Some(Ram::seq(after_a))
}

/// Compiles all facts into direct `Insert`s into their relation's `Full`
/// store, and every stratum (in evaluation order, pseudo-strata run under
/// `Par`) into its semi-naive fixpoint block. Alongside the `Ram`, returns
/// the union-find-closed [`PositionAssignment`] (spec §4.3) the
/// interpreter uses to decide when a value needs boxing/unboxing through
/// [`crate::boxing::BoxingTable`].
pub fn compile(datalog: &Datalog, registry: &PredicateRegistry, strata: &StrataMap) -> (Ram, PositionAssignment) {
    let mut ctx = CompileCtx { registry, strata, next_row_var: 0, positions: PositionBuilder::new() };

    let mut by_relation: HashMap<&str, Vec<Vec<crate::value::Boxed>>> = HashMap::new();
    for fact in &datalog.facts {
        by_relation.entry(fact.sym.as_ref()).or_default().push(fact.values.clone());
    }
    let mut top = Vec::new();
    for (name, tuples) in by_relation {
        for col in 0..tuples.first().map_or(0, |t| t.len()) {
            ctx.relation_pos(name, col);
        }
        top.push(Ram::Insert { tuples, into: registry.full(name) });
    }

    for group in ordered_strata(strata) {
        let mut blocks = Vec::new();
        for stratum in group {
            if let Some(block) = compile_stratum(&mut ctx, datalog, stratum) {
                blocks.push(block);
            }
        }
        if !blocks.is_empty() {
            top.push(Ram::par(blocks));
        }
    }
    (Ram::seq(top), ctx.positions.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{AtomBuilder, RuleBuilder};
    use crate::predicate::Denotation;
    use crate::value::Boxed;

    fn tc_program() -> (Datalog, PredicateRegistry, StrataMap) {
        let mut d = Datalog::new();
        d.declare("edge", 2, Denotation::Relational);
        d.declare("path", 2, Denotation::Relational);
        d.add_fact(crate::ast::Fact { sym: "edge".into(), values: vec![Boxed::Int64(1), Boxed::Int64(2)] });
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
        let mut registry = PredicateRegistry::new(16);
        for rel in &d.relations {
            registry.register(rel.name.clone(), rel.arity, rel.denotation.clone());
        }
        let graph = crate::precedence::PrecedenceGraph::from_datalog(&d);
        let strata = crate::precedence::Stratifier::stratify(&graph).unwrap();
        (d, registry, strata)
    }

    #[test]
    fn compiles_without_panicking_and_contains_an_until_loop() {
        let (d, registry, strata) = tc_program();
        let (ram, _positions) = compile(&d, &registry, &strata);
        fn contains_until(r: &Ram) -> bool {
            match r {
                Ram::Until { .. } => true,
                Ram::Seq(s) | Ram::Par(s) => s.iter().any(contains_until),
                _ => false,
            }
        }
        assert!(contains_until(&ram));
    }

    #[test]
    fn incremental_phase_emits_one_copy_per_recursive_atom() {
        let (d, registry, strata) = tc_program();
        let mut ctx = CompileCtx { registry: &registry, strata: &strata, next_row_var: 0, positions: PositionBuilder::new() };
        let rule = &d.rules[1]; // path(x,z) :- path(x,y), edge(y,z).
        let stratum = strata["path"];
        let copies = compile_rule(&mut ctx, rule, 1, stratum, Phase::Incremental);
        assert_eq!(copies.len(), 1); // only `path` is IDB-in-stratum; edge is EDB.
    }
}
