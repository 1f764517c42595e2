//! # Simplifier
//!
//! Cheap, purely local rewrites over a freshly compiled [`Ram`] tree (spec
//! §4.7), run before hoisting gets a chance to fold guards into index
//! bounds: tautology removal, guard reordering, dead-`If`/`Until` removal,
//! and `Seq`/`Par` flattening.

use crate::ram::{term_eq, BoolExpr, Ram, RamTerm};

/// `true` for a guard whose elimination can never change a program's
/// meaning: `x = x` under our structural definition of equal terms.
fn is_tautology(guard: &BoolExpr) -> bool {
    matches!(guard, BoolExpr::Eq(a, b) if term_eq(a, b))
}

/// Member-of (and its negation) tests are the only guards that do not
/// depend purely on already-bound scalar terms — they touch an index —
/// so they are pushed to the end of the list where a short-circuiting
/// `&&` chain evaluates them last.
fn is_membership_test(guard: &BoolExpr) -> bool {
    matches!(guard, BoolExpr::MemberOf(..))
        || matches!(guard, BoolExpr::Not(inner) if matches!(**inner, BoolExpr::MemberOf(..)))
}

fn simplify_guards(guards: Vec<BoolExpr>) -> Vec<BoolExpr> {
    let mut scalar = Vec::new();
    let mut membership = Vec::new();
    for g in guards {
        if is_tautology(&g) {
            continue;
        }
        if is_membership_test(&g) {
            membership.push(g);
        } else {
            scalar.push(g);
        }
    }
    scalar.extend(membership);
    scalar
}

/// A subtree that can never produce a new derivation: bookkeeping only.
/// An `Until` whose body reduces to this is dead weight — looping it would
/// never converge on anything but its own starting state (spec §4.7).
fn is_inert(ram: &Ram) -> bool {
    match ram {
        Ram::MergeInto { .. } | Ram::Swap { .. } | Ram::Purge { .. } | Ram::Comment(_) | Ram::EstimateJoinSize { .. } => true,
        Ram::Seq(stmts) | Ram::Par(stmts) => stmts.iter().all(is_inert),
        Ram::If { body, .. } => is_inert(body),
        _ => false,
    }
}

/// Rewrites one node, returning `None` when the node disappears entirely
/// (an emptied `Seq`/`Par`, a dead `Until`).
fn simplify_node(ram: Ram) -> Option<Ram> {
    match ram {
        Ram::Search { rv, rel, guards, body } => {
            let guards = simplify_guards(guards);
            let body = simplify_node(*body)?;
            Some(Ram::Search { rv, rel, guards, body: Box::new(body) })
        }
        Ram::Query { rv, rel, bindings, guards, body } => {
            let guards = simplify_guards(guards);
            let body = simplify_node(*body)?;
            Some(Ram::Query { rv, rel, bindings, guards, body: Box::new(body) })
        }
        Ram::If { guards, body } => {
            let guards = simplify_guards(guards);
            let body = simplify_node(*body)?;
            if guards.is_empty() {
                Some(body)
            } else {
                Some(Ram::If { guards, body: Box::new(body) })
            }
        }
        Ram::Functional { out_rv, arity, func, args, body } => {
            let body = simplify_node(*body)?;
            Some(Ram::Functional { out_rv, arity, func, args, body: Box::new(body) })
        }
        Ram::Seq(stmts) => {
            let simplified: Vec<Ram> = stmts.into_iter().filter_map(simplify_node).collect();
            if simplified.is_empty() {
                None
            } else {
                Some(Ram::seq(simplified))
            }
        }
        Ram::Par(stmts) => {
            let simplified: Vec<Ram> = stmts.into_iter().filter_map(simplify_node).collect();
            if simplified.is_empty() {
                None
            } else {
                Some(Ram::par(simplified))
            }
        }
        Ram::Until { until_empty, body } => {
            let body = simplify_node(*body)?;
            if is_inert(&body) {
                None
            } else {
                Some(Ram::Until { until_empty, body: Box::new(body) })
            }
        }
        other @ (Ram::Project { .. }
        | Ram::Insert { .. }
        | Ram::MergeInto { .. }
        | Ram::Swap { .. }
        | Ram::Purge { .. }
        | Ram::Comment(_)
        | Ram::EstimateJoinSize { .. }) => Some(other),
    }
}

/// Entry point: simplifies a whole program, collapsing to an empty `Seq`
/// if every top-level statement turned out to be dead (an empty input
/// program, in practice).
pub fn simplify(ram: Ram) -> Ram {
    simplify_node(ram).unwrap_or_else(|| Ram::Seq(Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::PredSym;
    use crate::value::Boxed;
    use crate::ram::RowVar;

    fn dummy_pred(id: u64) -> PredSym {
        PredSym { name: "p".into(), id, variant: crate::predicate::Variant::Full }
    }

    #[test]
    fn tautological_eq_guard_is_dropped() {
        let guards = vec![BoolExpr::Eq(RamTerm::Attr(RowVar(0), 0), RamTerm::Attr(RowVar(0), 0))];
        assert!(simplify_guards(guards).is_empty());
    }

    #[test]
    fn membership_tests_move_to_the_end() {
        let member = BoolExpr::MemberOf(dummy_pred(0), vec![]);
        let scalar = BoolExpr::Eq(RamTerm::Const(Boxed::Int64(1)), RamTerm::Const(Boxed::Int64(1)));
        // scalar is a tautology and drops out; use a non-tautological one.
        let scalar2 = BoolExpr::Neq(RamTerm::Const(Boxed::Int64(1)), RamTerm::Const(Boxed::Int64(2)));
        let out = simplify_guards(vec![member.clone(), scalar2]);
        assert!(matches!(out[0], BoolExpr::Neq(..)));
        assert!(matches!(out[1], BoolExpr::MemberOf(..)));
        let _ = scalar;
    }

    #[test]
    fn if_with_no_guards_collapses_to_body() {
        let body = Ram::Comment("x".into());
        let r = Ram::If { guards: vec![], body: Box::new(body) };
        let out = simplify(r);
        assert!(matches!(out, Ram::Comment(_)));
    }

    #[test]
    fn until_with_only_housekeeping_body_is_dropped() {
        let pred = dummy_pred(1);
        let body = Ram::Seq(vec![
            Ram::MergeInto { from: pred.clone(), into: pred.clone() },
            Ram::Swap { a: pred.clone(), b: pred.clone() },
            Ram::Purge { rel: pred.clone() },
        ]);
        let until = Ram::Until { until_empty: vec![pred], body: Box::new(body) };
        let out = simplify(until);
        assert!(matches!(out, Ram::Seq(s) if s.is_empty()));
    }

    #[test]
    fn until_with_a_search_survives() {
        let pred = dummy_pred(2);
        let body = Ram::Search {
            rv: RowVar(0),
            rel: pred.clone(),
            guards: vec![],
            body: Box::new(Ram::Comment("noop".into())),
        };
        let until = Ram::Until { until_empty: vec![pred], body: Box::new(body) };
        let out = simplify(until);
        assert!(matches!(out, Ram::Until { .. }));
    }

    #[test]
    fn nested_empty_seq_flattens_away() {
        let r = Ram::Seq(vec![Ram::Seq(vec![]), Ram::Seq(vec![Ram::Comment("a".into())])]);
        let out = simplify(r);
        match out {
            Ram::Seq(s) => assert_eq!(s.len(), 1),
            _ => panic!("expected Seq"),
        }
    }
}
