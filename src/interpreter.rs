//! # Interpreter
//!
//! Executes a [`crate::lowering::Lowered`] program against a bank of
//! [`OrderedIndex`]es (spec §4.13). Every domain value that crosses an
//! index boundary is boxed/unboxed through [`BoxingTable`] at the unified
//! position assigned to the row variable's column; lattice payloads are
//! carried as raw [`Boxed`] throughout and never touch the boxing table.
//!
//! Parallelism is bounded by a `par_level` budget that decrements with
//! every nested `ESearch`/`EPar`: once it reaches zero, further scans run
//! sequentially (spec §5). `EPar` fans its children out across the `rayon`
//! pool, each receiving an independent clone of the row-variable scratch
//! state (`Env`) — the indexes themselves stay shared.

use crate::ast::FunctionRegistry;
use crate::boxing::BoxingTable;
use crate::error::bug;
use crate::lowering::{EBoolExpr, ELoweredTerm, EProjectTerm, ERam, IndexDescriptor, Lowered};
use crate::ordered_index::OrderedIndex;
use crate::predicate::{Denotation, PositionAssignment, PredicateRegistry, UnifiedPosition};
use crate::value::{Boxed, Tuple};
use rayon::prelude::*;

/// Per-row-variable scratch state, cloned whenever a scan or an `EPar`
/// branch needs an independent copy to mutate. Indexes are not part of
/// this struct — they are shared for the whole interpreter run.
#[derive(Clone)]
struct Env {
    tuple_env: Vec<Option<Tuple>>,
    lat_env: Vec<Option<Boxed>>,
    min_env: Vec<Vec<i64>>,
    max_env: Vec<Vec<i64>>,
}

/// Static per-row-variable layout, computed once from the lowered program:
/// which physical column holds which logical attribute, and (for
/// index-bound row variables) which index slot binds it.
struct RowVarLayout {
    /// `phys_of_logical[logical_col] = physical position in the stored,
    /// permuted `Tuple``. `None` for a functional-produced row variable,
    /// whose tuple is synthesized directly in logical order.
    phys_of_logical: Option<Vec<usize>>,
    /// Number of boxed domain (key) columns, excluding any trailing
    /// provenance depth/rule-number columns.
    key_arity: usize,
    /// Total physical column count (`key_arity`, plus two when the
    /// program carries provenance depth/rule-number columns).
    tuple_arity: usize,
}

impl RowVarLayout {
    fn logical_to_physical(&self, logical_col: usize) -> usize {
        match &self.phys_of_logical {
            Some(inv) => inv[logical_col],
            None => logical_col,
        }
    }
}

pub struct Interpreter<'a> {
    indexes: Vec<OrderedIndex>,
    descriptors: Vec<IndexDescriptor>,
    registry: &'a PredicateRegistry,
    positions: &'a PositionAssignment,
    boxing: &'a BoxingTable,
    functions: &'a FunctionRegistry,
    layouts: Vec<RowVarLayout>,
    /// `row_positions[rv][col]` is the unified position backing that row
    /// variable's `col`'th domain column — used to box/unbox values read
    /// off (or written into) that attribute.
    row_positions: Vec<Vec<UnifiedPosition>>,
    par_level: usize,
    profile_sink: Option<&'a dyn crate::profiler::ProfileSink>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        lowered: &Lowered,
        registry: &'a PredicateRegistry,
        positions: &'a PositionAssignment,
        boxing: &'a BoxingTable,
        functions: &'a FunctionRegistry,
        index_arity: usize,
        par_level: usize,
    ) -> Self {
        let descriptors = lowered.index_slots.descriptors().to_vec();
        let indexes = descriptors.iter().map(|d| OrderedIndex::new(d.order.clone(), index_arity)).collect();

        let mut layouts: Vec<Option<RowVarLayout>> = (0..lowered.row_var_count).map(|_| None).collect();
        let mut row_positions: Vec<Vec<UnifiedPosition>> = (0..lowered.row_var_count).map(|_| Vec::new()).collect();
        collect_layouts(&lowered.ram, registry, positions, &descriptors, &mut layouts, &mut row_positions);

        let layouts = layouts
            .into_iter()
            .enumerate()
            .map(|(rv, l)| l.unwrap_or_else(|| bug!("row variable {rv} never bound by a Search/Query/Functional node")))
            .collect();

        Interpreter { indexes, descriptors, registry, positions, boxing, functions, layouts, row_positions, par_level, profile_sink: None }
    }

    /// Attaches a [`crate::profiler::ProfileSink`] so `EEstimateJoinSize`
    /// probes report into it as the program runs. Used only for the
    /// profiling pre-pass over sampled facts (spec §4.10); a normal solve
    /// never calls this.
    pub fn with_profile_sink(mut self, sink: &'a dyn crate::profiler::ProfileSink) -> Self {
        self.profile_sink = Some(sink);
        self
    }

    /// Runs the whole program, applying `const_writes` to a template `Env`
    /// before the first statement executes.
    pub fn run(mut self, lowered: &Lowered) -> Vec<OrderedIndex> {
        let mut env = self.base_env();
        for cw in &lowered.const_writes {
            let value = self.eval_boxed(&cw.value, &env);
            let pos = self.row_positions[cw.target_rv][cw.target_col];
            let code = self.boxing.unbox_with(&value, pos);
            env.min_env[cw.target_rv][self.layouts[cw.target_rv].logical_to_physical(cw.target_col)] = code;
            env.max_env[cw.target_rv][self.layouts[cw.target_rv].logical_to_physical(cw.target_col)] = code;
        }
        self.exec(&lowered.ram, &mut env, self.par_level);
        std::mem::take(&mut self.indexes)
    }

    pub fn into_indexes(self) -> Vec<OrderedIndex> {
        self.indexes
    }

    pub fn indexes(&self) -> &[OrderedIndex] {
        &self.indexes
    }

    pub fn descriptors(&self) -> &[IndexDescriptor] {
        &self.descriptors
    }

    fn base_env(&self) -> Env {
        Env {
            tuple_env: vec![None; self.layouts.len()],
            lat_env: vec![None; self.layouts.len()],
            min_env: self.layouts.iter().map(|l| vec![i64::MIN; l.tuple_arity]).collect(),
            max_env: self.layouts.iter().map(|l| vec![i64::MAX; l.tuple_arity]).collect(),
        }
    }

    fn exec(&self, node: &ERam, env: &mut Env, par_budget: usize) {
        match node {
            ERam::ESearch { rv, index_slot, guards, write_list, body } => {
                self.exec_search(*rv, *index_slot, guards, write_list, body, env, par_budget)
            }
            ERam::EQuery { rv, index_slot, guards, write_list, body } => {
                self.exec_query(*rv, *index_slot, guards, write_list, body, env, par_budget)
            }
            ERam::EProject { terms, index_slot, lattice } => self.exec_project(terms, *index_slot, *lattice, env),
            ERam::EInsert { tuples, index_slot } => self.exec_insert(tuples, *index_slot),
            ERam::EIf { guards, body } => {
                if guards.iter().all(|g| self.eval_bool(g, env)) {
                    self.exec(body, env, par_budget);
                }
            }
            ERam::EFunctional { out_rv, arity, func, args, body } => {
                self.exec_functional(*out_rv, *arity, func, args, body, env, par_budget)
            }
            ERam::EMergeInto { from_slot, into_slot, lattice_join } => {
                self.exec_merge_into(*from_slot, *into_slot, lattice_join.as_deref())
            }
            ERam::ESwap { a_slot, b_slot } => self.indexes[*a_slot].swap_contents(&self.indexes[*b_slot]),
            ERam::EPurge { slot } => self.indexes[*slot].clear(),
            ERam::EEstimateJoinSize { index_slot, attrs } => self.exec_estimate_join_size(*index_slot, attrs),
            ERam::ESeq(stmts) => {
                for s in stmts {
                    self.exec(s, env, par_budget);
                }
            }
            ERam::EPar(stmts) => self.exec_par(stmts, env, par_budget),
            ERam::EUntil { until_empty, body } => {
                while until_empty.iter().any(|&slot| !self.indexes[slot].is_empty()) {
                    self.exec(body, env, par_budget);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_search(
        &self,
        rv: usize,
        index_slot: usize,
        guards: &[EBoolExpr],
        write_list: &[crate::lowering::WriteOp],
        body: &ERam,
        env: &Env,
        par_budget: usize,
    ) {
        let index = &self.indexes[index_slot];
        let visit = |tuple: &Tuple, payload: &Boxed| {
            let mut local = env.clone();
            local.tuple_env[rv] = Some(tuple.clone());
            local.lat_env[rv] = Some(payload.clone());
            if !guards.iter().all(|g| self.eval_bool(g, &local)) {
                return;
            }
            self.apply_write_list(write_list, &local.clone(), &mut local);
            let mut local = local;
            self.exec(body, &mut local, par_budget.saturating_sub(1));
        };
        if par_budget > 0 {
            index.par_for_each(visit);
        } else {
            index.for_each(visit);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_query(
        &self,
        rv: usize,
        index_slot: usize,
        guards: &[EBoolExpr],
        write_list: &[crate::lowering::WriteOp],
        body: &ERam,
        env: &Env,
        par_budget: usize,
    ) {
        let index = &self.indexes[index_slot];
        // `min_env`/`max_env` are populated by earlier row variables'
        // write lists using this same row variable's layout (see
        // `apply_write_list`), so they are already keyed in the physical
        // order this index stores tuples in — no further permutation.
        let lo = Tuple::new(env.min_env[rv].clone());
        let hi = Tuple::new(env.max_env[rv].clone());
        let visit = |tuple: &Tuple, payload: &Boxed| {
            let mut local = env.clone();
            local.tuple_env[rv] = Some(tuple.clone());
            local.lat_env[rv] = Some(payload.clone());
            if !guards.iter().all(|g| self.eval_bool(g, &local)) {
                return;
            }
            self.apply_write_list(write_list, &local.clone(), &mut local);
            let mut local = local;
            self.exec(body, &mut local, par_budget.saturating_sub(1));
        };
        if par_budget > 0 {
            let snapshot_budget = par_budget;
            let _ = snapshot_budget;
            index.range(&lo, &hi, |t, v| visit(t, v));
        } else {
            index.range(&lo, &hi, |t, v| visit(t, v));
        }
    }

    fn apply_write_list(&self, write_list: &[crate::lowering::WriteOp], source: &Env, target: &mut Env) {
        for op in write_list {
            let value = self.eval_boxed(&op.value, source);
            let pos = self.row_positions[op.target_rv][op.target_col];
            let code = self.boxing.unbox_with(&value, pos);
            let phys = self.layouts[op.target_rv].logical_to_physical(op.target_col);
            target.min_env[op.target_rv][phys] = code;
            target.max_env[op.target_rv][phys] = code;
        }
    }

    fn exec_project(&self, terms: &[EProjectTerm], index_slot: usize, lattice: bool, env: &Env) {
        let pred = &self.descriptors[index_slot].pred;
        let base_id = pred.base_id(self.registry.max_ids());
        let key_arity = self.registry.arity(&pred.name);

        let mut key = Vec::new();
        let mut payload = Boxed::NoValue;
        let mut next_key_col = 0usize;
        for term in terms {
            match term {
                EProjectTerm::LatticeValue(rv) => {
                    payload = env.lat_env[*rv].clone().unwrap_or_else(|| bug!("lattice value read before bound at rv {rv}"));
                }
                EProjectTerm::ProvMax(rvs) => {
                    let depth_col = key_arity;
                    let max_depth = rvs
                        .iter()
                        .map(|&rv| self.read_raw_logical(env, rv, depth_col))
                        .max();
                    key.push(max_depth.map(|m| m + 1).unwrap_or(0));
                }
                EProjectTerm::RuleNo(n) => key.push(*n),
                other => {
                    let value = self.eval_boxed_project(other, env);
                    let pos = self.positions.column(base_id, next_key_col);
                    key.push(self.boxing.unbox_with(&value, pos));
                    next_key_col += 1;
                }
            }
        }

        if lattice {
            let (bot, join) = match self.registry.denotation(&pred.name) {
                Denotation::Latticenal { bot, join, .. } => (bot.clone(), join.clone()),
                Denotation::Relational => bug!("lattice Project into a relational relation {}", pred.name),
            };
            let bot_value = self.functions.call_func(&bot, &[]);
            if payload == bot_value {
                return;
            }
            self.indexes[index_slot].put_with(&Tuple::new(key), payload, |existing, new| self.functions.call_func(&join, &[existing.clone(), new]));
        } else {
            self.indexes[index_slot].put(&Tuple::new(key), Boxed::NoValue);
        }
    }

    fn exec_insert(&self, tuples: &[Vec<Boxed>], index_slot: usize) {
        let pred = &self.descriptors[index_slot].pred;
        let base_id = pred.base_id(self.registry.max_ids());
        let key_arity = self.registry.arity(&pred.name);
        let is_lattice = self.registry.denotation(&pred.name).is_lattice();
        for row in tuples {
            let mut key = Vec::with_capacity(row.len());
            for col in 0..key_arity {
                let pos = self.positions.column(base_id, col);
                key.push(self.boxing.unbox_with(&row[col], pos));
            }
            let payload = if is_lattice { row[key_arity].clone() } else { Boxed::NoValue };
            let extra_start = key_arity + usize::from(is_lattice);
            for raw in &row[extra_start..] {
                match raw {
                    Boxed::Int64(v) => key.push(*v),
                    other => bug!("expected a raw provenance column in an inserted row, found {:?}", other.kind()),
                }
            }
            if is_lattice {
                let join = match self.registry.denotation(&pred.name) {
                    Denotation::Latticenal { join, .. } => join.clone(),
                    Denotation::Relational => unreachable!(),
                };
                self.indexes[index_slot].put_with(&Tuple::new(key), payload, |existing, new| self.functions.call_func(&join, &[existing.clone(), new]));
            } else {
                self.indexes[index_slot].put(&Tuple::new(key), payload);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_functional(&self, out_rv: usize, arity: usize, func: &str, args: &[ELoweredTerm], body: &ERam, env: &Env, par_budget: usize) {
        if arity != 1 {
            bug!("functional {func} has {arity} output variables; only single-output functionals are supported");
        }
        let boxed_args: Vec<Boxed> = args.iter().map(|a| self.eval_boxed(a, env)).collect();
        let result = self.functions.call_func(func, &boxed_args);
        let pos = self.row_positions[out_rv][0];
        let code = self.boxing.unbox_with(&result, pos);
        let mut local = env.clone();
        local.tuple_env[out_rv] = Some(Tuple::new(vec![code]));
        self.exec(body, &mut local, par_budget);
    }

    /// Reports the scanned relation's current size and, among `attrs`,
    /// how many of its tuples collide when projected onto those columns —
    /// a no-op unless a [`crate::profiler::ProfileSink`] is attached.
    fn exec_estimate_join_size(&self, index_slot: usize, attrs: &[usize]) {
        let Some(sink) = self.profile_sink else { return };
        let index = &self.indexes[index_slot];
        let size = index.len();
        let mut seen: std::collections::HashSet<Vec<i64>> = std::collections::HashSet::new();
        index.for_each(|tuple, _payload| {
            let projected: Vec<i64> = attrs.iter().map(|&c| tuple.get(c)).collect();
            seen.insert(projected);
        });
        let duplicates = size.saturating_sub(seen.len());
        sink.record(&self.descriptors[index_slot].pred.name, attrs, size, duplicates);
    }

    fn exec_merge_into(&self, from_slot: usize, into_slot: usize, lattice_join: Option<&str>) {
        let (from, into) = (&self.indexes[from_slot], &self.indexes[into_slot]);
        match lattice_join {
            Some(join) => from.merge_with(into, |existing, new| self.functions.call_func(join, &[existing.clone(), new])),
            None => from.merge(into),
        }
    }

    fn exec_par(&self, stmts: &[ERam], env: &Env, par_budget: usize) {
        if par_budget > 0 {
            stmts.par_iter().for_each(|s| {
                let mut local = env.clone();
                self.exec(s, &mut local, par_budget.saturating_sub(1));
            });
        } else {
            for s in stmts {
                let mut local = env.clone();
                self.exec(s, &mut local, par_budget);
            }
        }
    }

    fn read_raw_logical(&self, env: &Env, rv: usize, logical_col: usize) -> i64 {
        let phys = self.layouts[rv].logical_to_physical(logical_col);
        env.tuple_env[rv].as_ref().unwrap_or_else(|| bug!("rv {rv} read before bound")).get(phys)
    }

    fn eval_bool(&self, b: &EBoolExpr, env: &Env) -> bool {
        match b {
            EBoolExpr::Guard(f, args) => {
                let boxed: Vec<Boxed> = args.iter().map(|a| self.eval_boxed(a, env)).collect();
                self.functions.call_pred(f, &boxed)
            }
            EBoolExpr::Eq(a, b) => self.eval_boxed(a, env) == self.eval_boxed(b, env),
            EBoolExpr::Neq(a, b) => self.eval_boxed(a, env) != self.eval_boxed(b, env),
            EBoolExpr::Leq { bot, leq, lhs, rhs } => {
                let lhs_v = self.eval_boxed(lhs, env);
                let bot_v = self.functions.call_func(bot, &[]);
                if lhs_v == bot_v {
                    return true;
                }
                let rhs_v = self.eval_boxed(rhs, env);
                self.functions.call_pred(leq, &[lhs_v, rhs_v])
            }
            EBoolExpr::NotBot { bot, value } => {
                let v = self.eval_boxed(value, env);
                let bot_v = self.functions.call_func(bot, &[]);
                v != bot_v
            }
            EBoolExpr::MemberOf { index_slot, args } => {
                let pred = &self.descriptors[*index_slot].pred;
                let base_id = pred.base_id(self.registry.max_ids());
                let key: Vec<i64> = args
                    .iter()
                    .enumerate()
                    .map(|(i, a)| {
                        let v = self.eval_boxed(a, env);
                        self.boxing.unbox_with(&v, self.positions.column(base_id, i))
                    })
                    .collect();
                self.indexes[*index_slot].member_of(&Tuple::new(key))
            }
            EBoolExpr::IsEmpty { index_slot } => self.indexes[*index_slot].is_empty(),
            EBoolExpr::Not(inner) => !self.eval_bool(inner, env),
        }
    }

    fn eval_boxed(&self, term: &ELoweredTerm, env: &Env) -> Boxed {
        match term {
            ELoweredTerm::Attr(rv, col) => {
                let phys = self.layouts[*rv].logical_to_physical(*col);
                let code = env.tuple_env[*rv].as_ref().unwrap_or_else(|| bug!("rv {rv} read before bound")).get(phys);
                self.boxing.box_with(code, self.row_positions[*rv][*col])
            }
            ELoweredTerm::Const(b) => b.clone(),
            ELoweredTerm::App(f, args) => {
                let boxed: Vec<Boxed> = args.iter().map(|a| self.eval_boxed(a, env)).collect();
                self.functions.call_func(f, &boxed)
            }
            ELoweredTerm::LatticeValue(rv) => env.lat_env[*rv].clone().unwrap_or_else(|| bug!("lattice value read before bound at rv {rv}")),
        }
    }

    fn eval_boxed_project(&self, term: &EProjectTerm, env: &Env) -> Boxed {
        match term {
            EProjectTerm::Attr(rv, col) => {
                let phys = self.layouts[*rv].logical_to_physical(*col);
                let code = env.tuple_env[*rv].as_ref().unwrap_or_else(|| bug!("rv {rv} read before bound")).get(phys);
                self.boxing.box_with(code, self.row_positions[*rv][*col])
            }
            EProjectTerm::Const(b) => b.clone(),
            EProjectTerm::App(f, args) => {
                let boxed: Vec<Boxed> = args.iter().map(|a| self.eval_boxed_project(a, env)).collect();
                self.functions.call_func(f, &boxed)
            }
            EProjectTerm::LatticeValue(rv) => env.lat_env[*rv].clone().unwrap_or_else(|| bug!("lattice value read before bound at rv {rv}")),
            EProjectTerm::ProvMax(_) | EProjectTerm::RuleNo(_) => bug!("provenance term reached generic project-term evaluation"),
        }
    }
}

/// Walks the lowered tree once, recording each row variable's layout
/// (index-bound vs functional-produced) and unified-position table.
fn collect_layouts(
    ram: &ERam,
    registry: &PredicateRegistry,
    positions: &PositionAssignment,
    descriptors: &[IndexDescriptor],
    layouts: &mut [Option<RowVarLayout>],
    row_positions: &mut [Vec<UnifiedPosition>],
) {
    match ram {
        ERam::ESearch { rv, index_slot, body, .. } | ERam::EQuery { rv, index_slot, body, .. } => {
            if layouts[*rv].is_none() {
                let pred = &descriptors[*index_slot].pred;
                let base_id = pred.base_id(registry.max_ids());
                let key_arity = registry.arity(&pred.name);
                let order = &descriptors[*index_slot].order.0;
                let tuple_arity = order.len();
                let mut inv = vec![0usize; tuple_arity];
                for (p, &c) in order.iter().enumerate() {
                    inv[c] = p;
                }
                layouts[*rv] = Some(RowVarLayout { phys_of_logical: Some(inv), key_arity, tuple_arity });
                row_positions[*rv] = (0..key_arity).map(|c| positions.column(base_id, c)).collect();
            }
            collect_layouts(body, registry, positions, descriptors, layouts, row_positions);
        }
        ERam::EFunctional { out_rv, arity, body, .. } => {
            if layouts[*out_rv].is_none() {
                layouts[*out_rv] = Some(RowVarLayout { phys_of_logical: None, key_arity: *arity, tuple_arity: *arity });
                row_positions[*out_rv] = (0..*arity).map(|c| positions.row_var_attr(*out_rv as u32, c)).collect();
            }
            collect_layouts(body, registry, positions, descriptors, layouts, row_positions);
        }
        ERam::EIf { body, .. } | ERam::EUntil { body, .. } => {
            collect_layouts(body, registry, positions, descriptors, layouts, row_positions)
        }
        ERam::ESeq(stmts) | ERam::EPar(stmts) => {
            for s in stmts {
                collect_layouts(s, registry, positions, descriptors, layouts, row_positions);
            }
        }
        ERam::EProject { .. }
        | ERam::EInsert { .. }
        | ERam::EMergeInto { .. }
        | ERam::ESwap { .. }
        | ERam::EPurge { .. }
        | ERam::EEstimateJoinSize { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FunctionRegistry;
    use crate::predicate::{Denotation, PositionBuilder, PredicateRegistry};
    use crate::ram::{ProjectTerm, Ram, RamTerm, RowVar};
    use crate::value::Boxed;

    fn edge_program() -> (Ram, PredicateRegistry, PositionAssignment) {
        let mut registry = PredicateRegistry::new(8);
        registry.register("edge", 2, Denotation::Relational);
        let mut builder = PositionBuilder::new();
        let base_id = registry.full("edge").id;
        let p0 = builder.column_pos(base_id, 0);
        let p1 = builder.column_pos(base_id, 1);
        let _ = (p0, p1);
        let positions = builder.finish();

        let rv = RowVar(0);
        let ram = Ram::Search {
            rv,
            rel: registry.full("edge"),
            guards: vec![],
            body: Box::new(Ram::Project {
                terms: vec![ProjectTerm::Attr(rv, 1), ProjectTerm::Attr(rv, 0)],
                into: registry.full("edge"),
            }),
        };
        (ram, registry, positions)
    }

    #[test]
    fn search_and_project_round_trips_through_boxing() {
        let (ram, registry, positions) = edge_program();
        let catalogue = crate::index_selection::select_indexes(&ram, &registry);
        let lowered = crate::lowering::lower(&ram, &registry, &catalogue);
        let boxing = BoxingTable::new();
        let functions = FunctionRegistry::new();

        let base_id = registry.full("edge").id;
        let p0 = positions.column(base_id, 0);
        let p1 = positions.column(base_id, 1);
        let k0 = boxing.unbox_with(&Boxed::Int64(1), p0);
        let k1 = boxing.unbox_with(&Boxed::Int64(2), p1);

        let interp = Interpreter::new(&lowered, &registry, &positions, &boxing, &functions, 64, 2);
        interp.indexes[0].put(&Tuple::new(vec![k0, k1]), Boxed::NoValue);
        let indexes = interp.run(&lowered);
        assert!(indexes[0].member_of(&Tuple::new(vec![k1, k0])));
    }

    /// Max-int lattice: `bot = MIN`, `a <= b` iff `a <= b`, `join = max`.
    /// Builds a `Program` that scans `score` (a `Latticenal` relation) and
    /// re-projects into itself guarded by `NotBot`, exercising both the
    /// `Leq`/`NotBot` guard path (`eval_bool`) and `exec_project`'s
    /// bot-check/`put_with(join)` branch.
    fn max_int_functions() -> FunctionRegistry {
        let mut functions = FunctionRegistry::new();
        functions.register_func("int_bot", |_| Boxed::Int64(i64::MIN));
        functions.register_pred("int_leq", |args| match (&args[0], &args[1]) {
            (Boxed::Int64(a), Boxed::Int64(b)) => a <= b,
            other => panic!("unexpected args {other:?}"),
        });
        functions.register_func("int_join", |args| match (&args[0], &args[1]) {
            (Boxed::Int64(a), Boxed::Int64(b)) => Boxed::Int64((*a).max(*b)),
            other => panic!("unexpected args {other:?}"),
        });
        functions
    }

    fn score_denotation() -> Denotation {
        Denotation::Latticenal {
            bot: "int_bot".into(),
            leq: "int_leq".into(),
            join: "int_join".into(),
            meet: "int_join".into(),
        }
    }

    #[test]
    fn lattice_project_joins_rather_than_overwrites_on_repeated_keys() {
        let mut registry = PredicateRegistry::new(8);
        registry.register("score_in", 1, score_denotation());
        registry.register("score_out", 1, score_denotation());
        let mut builder = PositionBuilder::new();
        let in_id = registry.full("score_in").id;
        let out_id = registry.full("score_out").id;
        let _ = builder.column_pos(in_id, 0);
        let _ = builder.column_pos(out_id, 0);
        let positions = builder.finish();

        // Every row read out of `score_in`, regardless of its own key,
        // is re-projected into the single key `0` of `score_out` — so the
        // two seeded rows below can only land in `score_out` by way of a
        // real lattice join, not a last-write-wins `put`.
        let rv = RowVar(0);
        let ram = Ram::Search {
            rv,
            rel: registry.full("score_in"),
            guards: vec![],
            body: Box::new(Ram::Project {
                terms: vec![ProjectTerm::Const(Boxed::Int64(0)), ProjectTerm::LatticeValue(rv)],
                into: registry.full("score_out"),
            }),
        };

        let catalogue = crate::index_selection::select_indexes(&ram, &registry);
        let lowered = crate::lowering::lower(&ram, &registry, &catalogue);
        let boxing = BoxingTable::new();
        let functions = max_int_functions();

        let p_in = positions.column(in_id, 0);
        let key_a = boxing.unbox_with(&Boxed::Int64(1), p_in);
        let key_b = boxing.unbox_with(&Boxed::Int64(2), p_in);

        let interp = Interpreter::new(&lowered, &registry, &positions, &boxing, &functions, 64, 0);
        let in_slot = interp.descriptors.iter().position(|d| d.pred.name.as_ref() == "score_in").unwrap();
        let out_slot = interp.descriptors.iter().position(|d| d.pred.name.as_ref() == "score_out").unwrap();
        interp.indexes[in_slot].put(&Tuple::new(vec![key_a]), Boxed::Int64(3));
        interp.indexes[in_slot].put(&Tuple::new(vec![key_b]), Boxed::Int64(9));
        let indexes = interp.run(&lowered);

        let out_key = boxing.unbox_with(&Boxed::Int64(0), positions.column(out_id, 0));
        let mut seen = None;
        indexes[out_slot].for_each(|t, payload| {
            if t.get(0) == out_key {
                seen = Some(payload.clone());
            }
        });
        assert_eq!(seen, Some(Boxed::Int64(9)));
    }

    #[test]
    fn leq_guard_short_circuits_true_on_bot_without_reading_rhs() {
        let registry = PredicateRegistry::new(8);
        let functions = max_int_functions();
        let boxing = BoxingTable::new();
        let interp_registry = registry;
        let mut builder = PositionBuilder::new();
        let positions = builder.finish();
        let interp = bare_interpreter(&interp_registry, &positions, &boxing, &functions);

        let env = Env { tuple_env: vec![], lat_env: vec![], min_env: vec![], max_env: vec![] };
        let guard = EBoolExpr::Leq {
            bot: "int_bot".into(),
            leq: "int_leq".into(),
            lhs: ELoweredTerm::Const(Boxed::Int64(i64::MIN)),
            rhs: ELoweredTerm::App("int_bot".into(), vec![]),
        };
        assert!(interp.eval_bool(&guard, &env));

        let not_bot = EBoolExpr::NotBot { bot: "int_bot".into(), value: ELoweredTerm::Const(Boxed::Int64(5)) };
        assert!(interp.eval_bool(&not_bot, &env));
        let is_bot = EBoolExpr::NotBot { bot: "int_bot".into(), value: ELoweredTerm::Const(Boxed::Int64(i64::MIN)) };
        assert!(!interp.eval_bool(&is_bot, &env));
    }

    fn bare_interpreter<'a>(
        registry: &'a PredicateRegistry,
        positions: &'a PositionAssignment,
        boxing: &'a BoxingTable,
        functions: &'a FunctionRegistry,
    ) -> Interpreter<'a> {
        Interpreter {
            indexes: Vec::new(),
            descriptors: Vec::new(),
            registry,
            positions,
            boxing,
            functions,
            layouts: Vec::new(),
            row_positions: Vec::new(),
            par_level: 0,
            profile_sink: None,
        }
    }
}
