//! # Join Optimizer (Selinger Reorder)
//!
//! Reorders a maximal straight-line chain of `Search`/`Query` nodes using
//! dynamic programming over subsets (Selinger's algorithm), costed from a
//! [`JoinProfile`] (spec §4.10b). `Functional` and non-membership `If`
//! nodes are left pinned exactly where the compiler put them — they
//! already sit after every row variable they read, and the cost model
//! treats them as effectively free/last per spec §9's note that a
//! functional's cost is infinite until its arguments are ground.
//!
//! Disabled by `disable_join_optimizer`, or silently skipped (identity
//! order) whenever a chain has too many steps for the 2^n subset DP to be
//! worth it or the optional [`JoinProfile`] isn't available.

use crate::predicate::PredicateRegistry;
use crate::profiler::JoinProfile;
use crate::ram::{BoolExpr, Ram, RamTerm, RowVar};

const MAX_DP_STEPS: usize = 18;

#[derive(Clone)]
enum Shape {
    Search { guards: Vec<BoolExpr> },
    Query { bindings: Vec<(usize, RamTerm)>, guards: Vec<BoolExpr> },
}

struct ChainStep {
    rv: RowVar,
    rel: crate::predicate::PredSym,
    shape: Shape,
}

impl ChainStep {
    fn bound_attrs(&self) -> Vec<usize> {
        match &self.shape {
            Shape::Search { .. } => Vec::new(),
            Shape::Query { bindings, .. } => bindings.iter().map(|(c, _)| *c).collect(),
        }
    }

    fn rebuild(self, body: Ram) -> Ram {
        match self.shape {
            Shape::Search { guards } => Ram::Search { rv: self.rv, rel: self.rel, guards, body: Box::new(body) },
            Shape::Query { bindings, guards } => {
                Ram::Query { rv: self.rv, rel: self.rel, bindings, guards, body: Box::new(body) }
            }
        }
    }
}

/// Peels the maximal prefix of `Search`/`Query` nodes whose body is, in
/// turn, directly another `Search`/`Query` (a straight-line join chain),
/// returning the steps in original order plus the first node that breaks
/// the chain (the tail, not yet recursed into).
fn peel_chain(ram: Ram) -> (Vec<ChainStep>, Ram) {
    let mut steps = Vec::new();
    let mut current = ram;
    loop {
        match current {
            Ram::Search { rv, rel, guards, body } => {
                steps.push(ChainStep { rv, rel, shape: Shape::Search { guards } });
                current = *body;
            }
            Ram::Query { rv, rel, bindings, guards, body } => {
                steps.push(ChainStep { rv, rel, shape: Shape::Query { bindings, guards } });
                current = *body;
            }
            other => return (steps, other),
        }
    }
}

/// Selinger DP over `steps`, returning the optimal evaluation order as a
/// permutation of indices. Falls back to the identity order for chains
/// too large for the exponential DP, or when `profile` has nothing to say.
fn selinger_order(steps: &[ChainStep], profile: &JoinProfile, registry: &PredicateRegistry) -> Vec<usize> {
    let n = steps.len();
    if n == 0 || n > MAX_DP_STEPS {
        return (0..n).collect();
    }
    let full = 1usize << n;
    let mut best_cost = vec![f64::INFINITY; full];
    let mut best_tuples = vec![0f64; full];
    let mut choice = vec![None; full];
    best_cost[0] = 0.0;
    best_tuples[0] = 1.0;

    for mask in 0..full {
        if best_cost[mask].is_infinite() && mask != 0 {
            continue;
        }
        for v in 0..n {
            if mask & (1 << v) != 0 {
                continue;
            }
            let next_mask = mask | (1 << v);
            let rel_name = steps[v].rel.name.as_ref();
            let tuples = if mask == 0 {
                profile.size_of(rel_name).max(1) as f64
            } else {
                best_tuples[mask] * profile.selectivity(rel_name, &steps[v].bound_attrs())
            };
            let arity = registry.arity(rel_name).max(1) as f64;
            let cost = best_cost[mask] + arity * tuples;
            if cost < best_cost[next_mask] {
                best_cost[next_mask] = cost;
                best_tuples[next_mask] = tuples;
                choice[next_mask] = Some(v);
            }
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut mask = full - 1;
    while mask != 0 {
        let v = choice[mask].unwrap_or_else(|| crate::error::bug!("selinger DP left mask {mask} with no recorded choice"));
        order.push(v);
        mask &= !(1 << v);
    }
    order.reverse();
    order
}

fn reorder_chain(ram: Ram, profile: &JoinProfile, registry: &PredicateRegistry) -> Ram {
    let (mut steps, tail) = peel_chain(ram);
    if steps.len() <= 1 {
        return match steps.pop() {
            Some(step) => step.rebuild(reorder_node(tail, profile, registry)),
            None => reorder_node(tail, profile, registry),
        };
    }
    let order = selinger_order(&steps, profile, registry);
    let rebuilt_tail = reorder_node(tail, profile, registry);
    // Take steps out in DP-chosen order; rebuild from the innermost out.
    let mut slots: Vec<Option<ChainStep>> = steps.into_iter().map(Some).collect();
    let mut body = rebuilt_tail;
    for &idx in order.iter().rev() {
        let step = slots[idx].take().unwrap_or_else(|| crate::error::bug!("selinger order reused step {idx}"));
        body = step.rebuild(body);
    }
    body
}

fn reorder_node(ram: Ram, profile: &JoinProfile, registry: &PredicateRegistry) -> Ram {
    match ram {
        Ram::Search { .. } | Ram::Query { .. } => reorder_chain(ram, profile, registry),
        Ram::If { guards, body } => Ram::If { guards, body: Box::new(reorder_node(*body, profile, registry)) },
        Ram::Functional { out_rv, arity, func, args, body } => {
            Ram::Functional { out_rv, arity, func, args, body: Box::new(reorder_node(*body, profile, registry)) }
        }
        Ram::Seq(stmts) => Ram::Seq(stmts.into_iter().map(|s| reorder_node(s, profile, registry)).collect()),
        Ram::Par(stmts) => Ram::Par(stmts.into_iter().map(|s| reorder_node(s, profile, registry)).collect()),
        Ram::Until { until_empty, body } => {
            Ram::Until { until_empty, body: Box::new(reorder_node(*body, profile, registry)) }
        }
        other => other,
    }
}

/// Applies Selinger reordering to every join chain in `ram`. A no-op
/// wrapper the solver skips entirely when `disable_join_optimizer` is set
/// or no profile was collected.
pub fn reorder(ram: Ram, profile: &JoinProfile, registry: &PredicateRegistry) -> Ram {
    reorder_node(ram, profile, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{Denotation, PredSym, Variant};

    fn pred(name: &str, id: u64) -> PredSym {
        PredSym { name: name.into(), id, variant: Variant::Full }
    }

    #[test]
    fn prefers_the_smaller_relation_first() {
        let mut registry = PredicateRegistry::new(8);
        registry.register("small", 1, Denotation::Relational);
        registry.register("big", 1, Denotation::Relational);

        // Fabricate sizes via the public API path used in production: a
        // CountingSink feeding into `into_profile`.
        let sink = crate::profiler::CountingSink::new();
        sink.record("small", &[], 5, 0);
        sink.record("big", &[], 5000, 0);
        let profile = sink.into_profile();

        let steps = vec![
            ChainStep { rv: RowVar(0), rel: pred("big", 1), shape: Shape::Search { guards: vec![] } },
            ChainStep { rv: RowVar(1), rel: pred("small", 0), shape: Shape::Search { guards: vec![] } },
        ];
        let order = selinger_order(&steps, &profile, &registry);
        assert_eq!(order[0], 1); // "small" (index 1 in `steps`) scanned first.
    }

    #[test]
    fn large_chains_fall_back_to_identity_order() {
        let registry = PredicateRegistry::new(64);
        let profile = JoinProfile::default();
        let steps: Vec<ChainStep> = (0..(MAX_DP_STEPS + 1))
            .map(|i| ChainStep { rv: RowVar(i as u32), rel: pred("r", i as u64), shape: Shape::Search { guards: vec![] } })
            .collect();
        let order = selinger_order(&steps, &profile, &registry);
        assert_eq!(order, (0..steps.len()).collect::<Vec<_>>());
    }
}
