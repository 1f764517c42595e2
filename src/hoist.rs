//! # Hoisting / Query Folding
//!
//! Folds a `Search`'s guards into index-usable equality bindings,
//! rewriting it to a [`Ram::Query`] (spec §4.8). Guards that reference no
//! `RowVar` at all are lifted above the node as a guarding `If` (with a
//! `¬is_empty` check on the scanned relation riding along, so the whole
//! insert short-circuits when the relation has nothing in it); one node's
//! own guard list naming two conflicting ground constants prunes that node
//! outright.
//!
//! `conflicting_ground_guards` only looks within a single node's guard
//! list. `compiler::compile_atom_occurrence` never actually emits a
//! doubly-ground `Eq` there — every guard it generates is `Attr vs Const`
//! (a literal atom argument) or `Attr vs Attr` (a repeated variable), since
//! `env` never binds a variable straight to a `Const`. The impossible-
//! equality shape spec §4.8 describes (two different literals unified into
//! the same class) shows up instead as two different-valued ground `Eq`
//! guards on two *different* row variables that the compiler's position
//! union-find has unified into one column identity — a cross-node check
//! this pass does not perform, since `hoist` runs before `lowering` builds
//! that union-find closure. See `DESIGN.md`'s Open Question decisions.

use crate::ram::{term_eq, BoolExpr, Ram, RamTerm};

/// `true` if `guards` contains two `Eq`s both sides of which are ground,
/// sharing one side's identity but disagreeing on the other — e.g.
/// `Eq(Const(1), Const(2))` and `Eq(Const(1), Const(3))`. Only catches the
/// conflict when it is visible within one node's own guard list; see the
/// module doc comment for why that is narrower than spec §4.8's full
/// impossible-equality analysis.
fn conflicting_ground_guards(guards: &[BoolExpr]) -> bool {
    let mut ground_eqs: Vec<(&RamTerm, &RamTerm)> = Vec::new();
    for g in guards {
        if let BoolExpr::Eq(a, b) = g {
            if a.is_ground() && b.is_ground() && !term_eq(a, b) {
                for &(pa, pb) in &ground_eqs {
                    // Same LHS identity, different ground RHS => impossible.
                    if term_eq(pa, a) && !term_eq(pb, b) {
                        return true;
                    }
                }
                ground_eqs.push((a, b));
            }
        }
    }
    false
}

/// Splits a `Search`'s guard list into: bindings usable as an index bound
/// (`Eq(Attr(rv, col), term)` where `term` doesn't itself reference `rv`),
/// guards ground enough to lift above the loop entirely, and everything
/// else (left as residual guards on the `Query`).
fn classify(rv: crate::ram::RowVar, guards: Vec<BoolExpr>) -> (Vec<(usize, RamTerm)>, Vec<BoolExpr>, Vec<BoolExpr>) {
    let mut bindings = Vec::new();
    let mut lifted = Vec::new();
    let mut residual = Vec::new();
    for g in guards {
        match &g {
            BoolExpr::Eq(RamTerm::Attr(bound_rv, col), term) if *bound_rv == rv && !references(term, rv) => {
                bindings.push((*col, term.clone()));
            }
            BoolExpr::Eq(term, RamTerm::Attr(bound_rv, col)) if *bound_rv == rv && !references(term, rv) => {
                bindings.push((*col, term.clone()));
            }
            _ if guard_is_ground(&g) => lifted.push(g),
            _ => residual.push(g),
        }
    }
    (bindings, lifted, residual)
}

fn references(term: &RamTerm, rv: crate::ram::RowVar) -> bool {
    let mut out = Vec::new();
    term.row_vars(&mut out);
    out.contains(&rv)
}

fn guard_is_ground(guard: &BoolExpr) -> bool {
    match guard {
        BoolExpr::Guard(_, args) => args.iter().all(RamTerm::is_ground),
        BoolExpr::Eq(a, b) | BoolExpr::Neq(a, b) => a.is_ground() && b.is_ground(),
        BoolExpr::Leq(_, a, b) => a.is_ground() && b.is_ground(),
        BoolExpr::NotBot(_, a) => a.is_ground(),
        BoolExpr::MemberOf(..) | BoolExpr::IsEmpty(_) => false,
        BoolExpr::Not(inner) => guard_is_ground(inner),
    }
}

fn hoist_node(ram: Ram) -> Option<Ram> {
    match ram {
        Ram::Search { rv, rel, guards, body } => {
            if conflicting_ground_guards(&guards) {
                return None;
            }
            let body = hoist_node(*body)?;
            let (bindings, lifted, residual) = classify(rv, guards);
            let query = Ram::Query { rv, rel: rel.clone(), bindings, guards: residual, body: Box::new(body) };
            Some(wrap_lifted(lifted, rel, query))
        }
        Ram::Query { rv, rel, bindings, guards, body } => {
            if conflicting_ground_guards(&guards) {
                return None;
            }
            let body = hoist_node(*body)?;
            let (more_bindings, lifted, residual) = classify(rv, guards);
            let mut all_bindings = bindings;
            all_bindings.extend(more_bindings);
            let query = Ram::Query { rv, rel: rel.clone(), bindings: all_bindings, guards: residual, body: Box::new(body) };
            Some(wrap_lifted(lifted, rel, query))
        }
        Ram::If { guards, body } => {
            if conflicting_ground_guards(&guards) {
                return None;
            }
            let body = hoist_node(*body)?;
            Some(Ram::If { guards, body: Box::new(body) })
        }
        Ram::Functional { out_rv, arity, func, args, body } => {
            let body = hoist_node(*body)?;
            Some(Ram::Functional { out_rv, arity, func, args, body: Box::new(body) })
        }
        Ram::Seq(stmts) => {
            let stmts: Vec<Ram> = stmts.into_iter().filter_map(hoist_node).collect();
            Some(Ram::seq(stmts))
        }
        Ram::Par(stmts) => {
            let stmts: Vec<Ram> = stmts.into_iter().filter_map(hoist_node).collect();
            if stmts.is_empty() {
                None
            } else {
                Some(Ram::par(stmts))
            }
        }
        Ram::Until { until_empty, body } => {
            let body = hoist_node(*body)?;
            Some(Ram::Until { until_empty, body: Box::new(body) })
        }
        other => Some(other),
    }
}

fn wrap_lifted(lifted: Vec<BoolExpr>, scanned_rel: crate::predicate::PredSym, query: Ram) -> Ram {
    if lifted.is_empty() {
        return query;
    }
    let mut guards = lifted;
    guards.push(BoolExpr::Not(Box::new(BoolExpr::IsEmpty(scanned_rel))));
    Ram::If { guards, body: Box::new(query) }
}

/// Entry point. Idempotent: re-running on an already-hoisted program is a
/// no-op past the first pass since `Query` is handled symmetrically with
/// `Search`.
pub fn hoist(ram: Ram) -> Ram {
    hoist_node(ram).unwrap_or_else(|| Ram::Seq(Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{PredSym, Variant};
    use crate::ram::RowVar;
    use crate::value::Boxed;

    fn pred(id: u64) -> PredSym {
        PredSym { name: "edge".into(), id, variant: Variant::Full }
    }

    #[test]
    fn equality_to_a_literal_becomes_a_binding() {
        let rv = RowVar(0);
        let search = Ram::Search {
            rv,
            rel: pred(0),
            guards: vec![BoolExpr::Eq(RamTerm::Attr(rv, 0), RamTerm::Const(Boxed::Int64(1)))],
            body: Box::new(Ram::Comment("x".into())),
        };
        match hoist(search) {
            Ram::Query { bindings, guards, .. } => {
                assert_eq!(bindings.len(), 1);
                assert_eq!(bindings[0].0, 0);
                assert!(guards.is_empty());
            }
            other => panic!("expected Query, got {other:?}"),
        }
    }

    #[test]
    fn conflicting_ground_equalities_within_one_node_prune_it() {
        let rv = RowVar(1);
        let lhs = RamTerm::Const(Boxed::Int64(1));
        let search = Ram::Search {
            rv,
            rel: pred(1),
            guards: vec![
                BoolExpr::Eq(lhs.clone(), RamTerm::Const(Boxed::Int64(2))),
                BoolExpr::Eq(lhs, RamTerm::Const(Boxed::Int64(3))),
            ],
            body: Box::new(Ram::Comment("x".into())),
        };
        let out = hoist(search);
        assert!(matches!(out, Ram::Seq(s) if s.is_empty()));
    }

    #[test]
    fn ground_guard_lifts_above_the_query_with_an_is_empty_check() {
        let rv = RowVar(2);
        let search = Ram::Search {
            rv,
            rel: pred(2),
            guards: vec![BoolExpr::Guard("always_true".into(), vec![RamTerm::Const(Boxed::Bool(true))])],
            body: Box::new(Ram::Comment("x".into())),
        };
        match hoist(search) {
            Ram::If { guards, body } => {
                assert_eq!(guards.len(), 2);
                assert!(matches!(*body, Ram::Query { .. }));
            }
            other => panic!("expected If, got {other:?}"),
        }
    }
}
