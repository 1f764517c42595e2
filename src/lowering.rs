//! # Lowering
//!
//! Rewrites the high-level [`Ram`] into an executable form with every
//! dictionary lookup resolved to a dense slot (spec §4.12): row variables
//! already carry a dense id assigned by the compiler (`RowVar(u32)` is
//! allocated from one monotonically increasing counter shared across the
//! whole program — see `crate::compiler::CompileCtx`), so a row variable's
//! slot *is* `RowVar.0 as usize`; this pass only has to resolve relations to
//! physical index slots and precompute the write lists that move an
//! attribute value from one row variable's bound tuple into another's
//! search bounds.
//!
//! Two passes over the (immutable) input tree: the first collects, for
//! every `Query` binding, either a [`ConstWrite`] (no row-variable
//! dependency — stamped once at interpreter start-up) or a [`WriteOp`]
//! bucketed under the producing row variable (the binding's dependency with
//! the largest id, which — since ids increase in join order — is the last
//! one bound); the second rebuilds the tree, attaching each row variable's
//! accumulated write list to the `Search`/`Query` node that binds it.
//!
//! Lattice `Leq`/`NotBot` tests resolve their `bot`/`leq` function names
//! once here rather than re-deriving them from the denotation at every
//! interpreter step. `lattice_fns` only resolves `bot`/`leq`; the `join`
//! function name is resolved separately at each `Ram::MergeInto` site, and
//! `Denotation::Latticenal`'s `meet` field is never read here or anywhere
//! else in this crate — there is no `meetSlot`/union-find lowering step for
//! it (see `DESIGN.md`'s Open Question decisions for why).

use crate::index_selection::IndexCatalogue;
use crate::predicate::{Denotation, PredSym, PredicateRegistry, Variant};
use crate::ram::{BoolExpr, ProjectTerm, Ram, RamTerm, RowVar};
use crate::value::Boxed;
use std::collections::HashMap;
use std::sync::Arc;

/// A value computable purely from bound row-variable attributes and
/// constants — the lowered counterpart of [`RamTerm`].
#[derive(Debug, Clone)]
pub enum ELoweredTerm {
    Attr(usize, usize),
    Const(Boxed),
    App(Arc<str>, Vec<ELoweredTerm>),
    LatticeValue(usize),
}

impl ELoweredTerm {
    fn row_vars(&self, out: &mut Vec<usize>) {
        match self {
            ELoweredTerm::Attr(rv, _) | ELoweredTerm::LatticeValue(rv) => out.push(*rv),
            ELoweredTerm::Const(_) => {}
            ELoweredTerm::App(_, args) => args.iter().for_each(|a| a.row_vars(out)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EBoolExpr {
    Guard(Arc<str>, Vec<ELoweredTerm>),
    Eq(ELoweredTerm, ELoweredTerm),
    Neq(ELoweredTerm, ELoweredTerm),
    Leq { bot: Arc<str>, leq: Arc<str>, lhs: ELoweredTerm, rhs: ELoweredTerm },
    NotBot { bot: Arc<str>, value: ELoweredTerm },
    MemberOf { index_slot: usize, args: Vec<ELoweredTerm> },
    IsEmpty { index_slot: usize },
    Not(Box<EBoolExpr>),
}

#[derive(Debug, Clone)]
pub enum EProjectTerm {
    Attr(usize, usize),
    Const(Boxed),
    App(Arc<str>, Vec<EProjectTerm>),
    ProvMax(Vec<usize>),
    RuleNo(i64),
    LatticeValue(usize),
}

/// Fires when `target_rv` is bound: copies `value` into `target_rv`'s own
/// search-tuple column `target_col` is wrong — a `WriteOp` instead targets
/// a *different*, not-yet-bound row variable's search bounds, keyed on the
/// row variable whose binding makes `value` computable.
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub target_rv: usize,
    pub target_col: usize,
    pub value: ELoweredTerm,
}

/// A one-time write applied to `min_env`/`max_env` before execution starts
/// — `value` references no row variable.
#[derive(Debug, Clone)]
pub struct ConstWrite {
    pub target_rv: usize,
    pub target_col: usize,
    pub value: ELoweredTerm,
}

#[derive(Debug, Clone)]
pub enum ERam {
    ESearch { rv: usize, index_slot: usize, guards: Vec<EBoolExpr>, write_list: Vec<WriteOp>, body: Box<ERam> },
    EQuery { rv: usize, index_slot: usize, guards: Vec<EBoolExpr>, write_list: Vec<WriteOp>, body: Box<ERam> },
    EProject { terms: Vec<EProjectTerm>, index_slot: usize, lattice: bool },
    EInsert { tuples: Vec<Vec<Boxed>>, index_slot: usize },
    EIf { guards: Vec<EBoolExpr>, body: Box<ERam> },
    EFunctional { out_rv: usize, arity: usize, func: Arc<str>, args: Vec<ELoweredTerm>, body: Box<ERam> },
    EMergeInto { from_slot: usize, into_slot: usize, lattice_join: Option<Arc<str>> },
    ESwap { a_slot: usize, b_slot: usize },
    EPurge { slot: usize },
    /// Profiling-only probe (see [`crate::profiler`]): records the scanned
    /// relation's current size and, per `attrs`, how many of its tuples
    /// collide when projected onto those columns.
    EEstimateJoinSize { index_slot: usize, attrs: Vec<usize> },
    ESeq(Vec<ERam>),
    EPar(Vec<ERam>),
    EUntil { until_empty: Vec<usize>, body: Box<ERam> },
}

/// One physical index's identity: which predicate variant it belongs to
/// and the column order it's keyed by.
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    pub pred: PredSym,
    pub order: crate::ordered_index::SearchOrder,
}

/// Dense `(PredSym, ordinal)` -> slot table, shared by every predicate's
/// `Full`/`Delta`/`New` variants (each gets its own physical index per
/// ordinal, even though the key order schema is shared — spec §3).
#[derive(Debug, Default)]
pub struct IndexSlots {
    descriptors: Vec<IndexDescriptor>,
    lookup: HashMap<(u64, usize), usize>,
}

impl IndexSlots {
    pub fn build(registry: &PredicateRegistry, catalogue: &IndexCatalogue) -> Self {
        let mut descriptors = Vec::new();
        let mut lookup = HashMap::new();
        for name in registry.names() {
            let orders = catalogue.orders(name);
            for variant in [Variant::Full, Variant::Delta, Variant::New] {
                let pred = registry.variant(name, variant);
                for (ordinal, order) in orders.iter().enumerate() {
                    let slot = descriptors.len();
                    descriptors.push(IndexDescriptor { pred: pred.clone(), order: order.clone() });
                    lookup.insert((pred.id, ordinal), slot);
                }
            }
        }
        IndexSlots { descriptors, lookup }
    }

    pub fn descriptors(&self) -> &[IndexDescriptor] {
        &self.descriptors
    }

    pub fn slot_for_ordinal(&self, pred: &PredSym, ordinal: usize) -> usize {
        *self
            .lookup
            .get(&(pred.id, ordinal))
            .unwrap_or_else(|| crate::error::bug!("no index slot for {}#{ordinal}", pred.name))
    }

    /// The slot for whatever index covers `bound_columns` on `pred` — for
    /// membership/emptiness tests any of the relation's indexes will do
    /// (they hold the same tuple set), so these always resolve ordinal 0.
    pub fn any_slot(&self, pred: &PredSym) -> usize {
        self.slot_for_ordinal(pred, 0)
    }
}

/// Output of the lowering pass: the executable tree, the index slot table,
/// the dense row-variable count (for sizing `tuple_env`/`lat_env`/etc), and
/// the one-time const writes to apply before the first iteration.
pub struct Lowered {
    pub ram: ERam,
    pub index_slots: IndexSlots,
    pub row_var_count: usize,
    pub const_writes: Vec<ConstWrite>,
}

struct LowerCtx<'a> {
    registry: &'a PredicateRegistry,
    catalogue: &'a IndexCatalogue,
    index_slots: &'a IndexSlots,
    max_rv: u32,
}

pub fn lower(ram: &Ram, registry: &PredicateRegistry, catalogue: &IndexCatalogue) -> Lowered {
    let index_slots = IndexSlots::build(registry, catalogue);
    let mut max_rv = 0u32;
    let mut rvs = Vec::new();
    ram.referenced_row_vars(&mut rvs);
    for rv in &rvs {
        max_rv = max_rv.max(rv.0);
    }

    let mut pending: HashMap<RowVar, Vec<WriteOp>> = HashMap::new();
    let mut const_writes = Vec::new();
    collect_writes(ram, &mut pending, &mut const_writes);

    let ctx = LowerCtx { registry, catalogue, index_slots: &index_slots, max_rv };
    let lowered = lower_node(&ctx, ram, &mut pending);

    Lowered { ram: lowered, index_slots, row_var_count: max_rv as usize + 1, const_writes }
}

fn lowered_term(t: &RamTerm) -> ELoweredTerm {
    match t {
        RamTerm::Attr(rv, c) => ELoweredTerm::Attr(rv.0 as usize, *c),
        RamTerm::Const(b) => ELoweredTerm::Const(b.clone()),
        RamTerm::App(f, args) => ELoweredTerm::App(f.clone(), args.iter().map(lowered_term).collect()),
        RamTerm::LatticeValue(rv) => ELoweredTerm::LatticeValue(rv.0 as usize),
    }
}

fn lowered_project_term(t: &ProjectTerm) -> EProjectTerm {
    match t {
        ProjectTerm::Attr(rv, c) => EProjectTerm::Attr(rv.0 as usize, *c),
        ProjectTerm::Const(b) => EProjectTerm::Const(b.clone()),
        ProjectTerm::App(f, args) => EProjectTerm::App(f.clone(), args.iter().map(lowered_project_term).collect()),
        ProjectTerm::ProvMax(rvs) => EProjectTerm::ProvMax(rvs.iter().map(|rv| rv.0 as usize).collect()),
        ProjectTerm::RuleNo(n) => EProjectTerm::RuleNo(*n),
        ProjectTerm::LatticeValue(rv) => EProjectTerm::LatticeValue(rv.0 as usize),
    }
}

fn lattice_fns(registry: &PredicateRegistry, pred: &PredSym) -> (Arc<str>, Arc<str>) {
    match registry.denotation(&pred.name) {
        Denotation::Latticenal { bot, leq, .. } => (bot.clone(), leq.clone()),
        Denotation::Relational => crate::error::bug!("Leq/NotBot guard on a non-lattice relation {}", pred.name),
    }
}

fn lowered_bool_expr(ctx: &LowerCtx, b: &BoolExpr) -> EBoolExpr {
    match b {
        BoolExpr::Guard(f, args) => EBoolExpr::Guard(f.clone(), args.iter().map(lowered_term).collect()),
        BoolExpr::Eq(a, b) => EBoolExpr::Eq(lowered_term(a), lowered_term(b)),
        BoolExpr::Neq(a, b) => EBoolExpr::Neq(lowered_term(a), lowered_term(b)),
        BoolExpr::Leq(pred, a, b) => {
            let (bot, leq) = lattice_fns(ctx.registry, pred);
            EBoolExpr::Leq { bot, leq, lhs: lowered_term(a), rhs: lowered_term(b) }
        }
        BoolExpr::NotBot(pred, a) => {
            let (bot, _) = lattice_fns(ctx.registry, pred);
            EBoolExpr::NotBot { bot, value: lowered_term(a) }
        }
        BoolExpr::MemberOf(pred, args) => {
            EBoolExpr::MemberOf { index_slot: ctx.index_slots.any_slot(pred), args: args.iter().map(lowered_term).collect() }
        }
        BoolExpr::IsEmpty(pred) => EBoolExpr::IsEmpty { index_slot: ctx.index_slots.any_slot(pred) },
        BoolExpr::Not(inner) => EBoolExpr::Not(Box::new(lowered_bool_expr(ctx, inner))),
    }
}

/// First pass: walks `ram` purely for its `Query` bindings, bucketing each
/// one as a `ConstWrite` (no row-variable dependency) or a `WriteOp` filed
/// under the binding's latest-bound dependency.
fn collect_writes(ram: &Ram, pending: &mut HashMap<RowVar, Vec<WriteOp>>, const_writes: &mut Vec<ConstWrite>) {
    match ram {
        Ram::Query { rv, bindings, body, .. } => {
            for (col, term) in bindings {
                let value = lowered_term(term);
                let mut deps = Vec::new();
                value.row_vars(&mut deps);
                match deps.iter().max() {
                    None => const_writes.push(ConstWrite { target_rv: rv.0 as usize, target_col: *col, value }),
                    Some(&max_dep) => {
                        pending
                            .entry(RowVar(max_dep as u32))
                            .or_default()
                            .push(WriteOp { target_rv: rv.0 as usize, target_col: *col, value });
                    }
                }
            }
            collect_writes(body, pending, const_writes);
        }
        Ram::Search { body, .. } | Ram::If { body, .. } | Ram::Functional { body, .. } | Ram::Until { body, .. } => {
            collect_writes(body, pending, const_writes)
        }
        Ram::Seq(stmts) | Ram::Par(stmts) => stmts.iter().for_each(|s| collect_writes(s, pending, const_writes)),
        Ram::Project { .. }
        | Ram::Insert { .. }
        | Ram::MergeInto { .. }
        | Ram::Swap { .. }
        | Ram::Purge { .. }
        | Ram::Comment(_)
        | Ram::EstimateJoinSize { .. } => {}
    }
}

fn lower_node(ctx: &LowerCtx, ram: &Ram, pending: &mut HashMap<RowVar, Vec<WriteOp>>) -> ERam {
    match ram {
        Ram::Search { rv, rel, guards, body } => {
            let index_slot = ctx.index_slots.any_slot(rel);
            let write_list = pending.remove(rv).unwrap_or_default();
            let guards = guards.iter().map(|g| lowered_bool_expr(ctx, g)).collect();
            ERam::ESearch { rv: rv.0 as usize, index_slot, guards, write_list, body: Box::new(lower_node(ctx, body, pending)) }
        }
        Ram::Query { rv, rel, bindings, guards, body } => {
            let cols: Vec<usize> = bindings.iter().map(|(c, _)| *c).collect();
            let index_slot = ctx.index_slots.slot_for_ordinal(rel, ctx.catalogue.index_for(&rel.name, &cols));
            let write_list = pending.remove(rv).unwrap_or_default();
            let guards = guards.iter().map(|g| lowered_bool_expr(ctx, g)).collect();
            ERam::EQuery { rv: rv.0 as usize, index_slot, guards, write_list, body: Box::new(lower_node(ctx, body, pending)) }
        }
        Ram::Project { terms, into } => {
            let index_slot = ctx.index_slots.any_slot(into);
            let lattice = ctx.registry.denotation(&into.name).is_lattice();
            ERam::EProject { terms: terms.iter().map(lowered_project_term).collect(), index_slot, lattice }
        }
        Ram::Insert { tuples, into } => ERam::EInsert { tuples: tuples.clone(), index_slot: ctx.index_slots.any_slot(into) },
        Ram::If { guards, body } => {
            ERam::EIf { guards: guards.iter().map(|g| lowered_bool_expr(ctx, g)).collect(), body: Box::new(lower_node(ctx, body, pending)) }
        }
        Ram::Functional { out_rv, arity, func, args, body } => ERam::EFunctional {
            out_rv: out_rv.0 as usize,
            arity: *arity,
            func: func.clone(),
            args: args.iter().map(lowered_term).collect(),
            body: Box::new(lower_node(ctx, body, pending)),
        },
        Ram::MergeInto { from, into } => {
            let lattice_join = match ctx.registry.denotation(&into.name) {
                Denotation::Latticenal { join, .. } => Some(join.clone()),
                Denotation::Relational => None,
            };
            ERam::EMergeInto { from_slot: ctx.index_slots.any_slot(from), into_slot: ctx.index_slots.any_slot(into), lattice_join }
        }
        Ram::Swap { a, b } => ERam::ESwap { a_slot: ctx.index_slots.any_slot(a), b_slot: ctx.index_slots.any_slot(b) },
        Ram::Purge { rel } => ERam::EPurge { slot: ctx.index_slots.any_slot(rel) },
        Ram::Seq(stmts) => ERam::ESeq(stmts.iter().map(|s| lower_node(ctx, s, pending)).collect()),
        Ram::Par(stmts) => ERam::EPar(stmts.iter().map(|s| lower_node(ctx, s, pending)).collect()),
        Ram::Until { until_empty, body } => ERam::EUntil {
            until_empty: until_empty.iter().map(|p| ctx.index_slots.any_slot(p)).collect(),
            body: Box::new(lower_node(ctx, body, pending)),
        },
        Ram::Comment(_) => ERam::ESeq(Vec::new()),
        Ram::EstimateJoinSize { rel, attrs, .. } => {
            ERam::EEstimateJoinSize { index_slot: ctx.index_slots.any_slot(rel), attrs: attrs.clone() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Denotation;
    use crate::ram::RowVar;

    fn setup() -> PredicateRegistry {
        let mut registry = PredicateRegistry::new(8);
        registry.register("edge", 2, Denotation::Relational);
        registry
    }

    #[test]
    fn row_var_slot_matches_its_own_id() {
        let registry = setup();
        let ram = Ram::Search {
            rv: RowVar(3),
            rel: registry.full("edge"),
            guards: vec![],
            body: Box::new(Ram::Project { terms: vec![ProjectTerm::Attr(RowVar(3), 0)], into: registry.full("edge") }),
        };
        let catalogue = crate::index_selection::select_indexes(&ram, &registry);
        let lowered = lower(&ram, &registry, &catalogue);
        assert_eq!(lowered.row_var_count, 4);
        match lowered.ram {
            ERam::ESearch { rv, .. } => assert_eq!(rv, 3),
            _ => panic!("expected ESearch"),
        }
    }

    #[test]
    fn query_binding_from_an_earlier_row_var_becomes_a_write_op() {
        let registry = setup();
        let rv0 = RowVar(0);
        let rv1 = RowVar(1);
        let inner = Ram::Query {
            rv: rv1,
            rel: registry.full("edge"),
            bindings: vec![(0, RamTerm::Attr(rv0, 1))],
            guards: vec![],
            body: Box::new(Ram::Project { terms: vec![], into: registry.full("edge") }),
        };
        let ram = Ram::Search { rv: rv0, rel: registry.full("edge"), guards: vec![], body: Box::new(inner) };
        let catalogue = crate::index_selection::select_indexes(&ram, &registry);
        let lowered = lower(&ram, &registry, &catalogue);
        match lowered.ram {
            ERam::ESearch { write_list, .. } => {
                assert_eq!(write_list.len(), 1);
                assert_eq!(write_list[0].target_rv, 1);
            }
            _ => panic!("expected ESearch"),
        }
    }

    #[test]
    fn ground_binding_becomes_a_const_write() {
        let registry = setup();
        let rv = RowVar(0);
        let ram = Ram::Query {
            rv,
            rel: registry.full("edge"),
            bindings: vec![(0, RamTerm::Const(Boxed::Int64(7)))],
            guards: vec![],
            body: Box::new(Ram::Project { terms: vec![], into: registry.full("edge") }),
        };
        let catalogue = crate::index_selection::select_indexes(&ram, &registry);
        let lowered = lower(&ram, &registry, &catalogue);
        assert_eq!(lowered.const_writes.len(), 1);
        assert_eq!(lowered.const_writes[0].target_rv, 0);
    }
}
