//! # Automatic Index Selection
//!
//! For each relation, collects the primitive searches (bound-column sets)
//! observed in the hoisted program's `Query` nodes and solves a minimum
//! chain cover over the subset poset via König's theorem (spec §4.9):
//! build a bipartite graph with an edge `a -> b` whenever `a` is a proper
//! subset of `b`, find a maximum matching, and read off chains from the
//! matching. Each chain becomes one physical index; `Full`, `Delta`, and
//! `New` of the same relation always share the resulting catalogue (spec
//! §3's index-schema-sharing invariant), so collection is keyed by
//! relation name alone, not by predicate id/variant.

use crate::ordered_index::SearchOrder;
use crate::predicate::PredicateRegistry;
use crate::ram::Ram;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Per-relation set of physical indexes chosen by the minimum chain
/// cover, plus a lookup from an observed bound-column set to the index
/// ordinal whose order has it as a usable prefix.
#[derive(Debug, Default)]
pub struct IndexCatalogue {
    indexes: HashMap<String, Vec<SearchOrder>>,
}

impl IndexCatalogue {
    pub fn orders(&self, relation: &str) -> &[SearchOrder] {
        self.indexes
            .get(relation)
            .map(Vec::as_slice)
            .unwrap_or_else(|| crate::error::bug!("no indexes registered for relation {relation}"))
    }

    /// First index ordinal whose key order starts with exactly the
    /// columns of `search` (in any order) — spec §8 property 7, "index
    /// cover". Every `search` fed in at selection time is guaranteed a
    /// match; a caller passing an unseen search is a lowering-time bug.
    pub fn index_for(&self, relation: &str, search: &[usize]) -> usize {
        let wanted: BTreeSet<usize> = search.iter().copied().collect();
        let orders = self.orders(relation);
        orders
            .iter()
            .position(|order| order.0.iter().take(wanted.len()).copied().collect::<BTreeSet<_>>() == wanted)
            .unwrap_or_else(|| crate::error::bug!("no physical index covers search {search:?} on {relation}"))
    }
}

fn collect_primitive_searches(ram: &Ram, out: &mut HashMap<String, HashSet<Vec<usize>>>) {
    match ram {
        Ram::Search { rel, body, .. } => {
            out.entry(rel.name.to_string()).or_default().insert(Vec::new());
            collect_primitive_searches(body, out);
        }
        Ram::Query { rel, bindings, body, .. } => {
            let mut cols: Vec<usize> = bindings.iter().map(|(c, _)| *c).collect();
            cols.sort_unstable();
            cols.dedup();
            out.entry(rel.name.to_string()).or_default().insert(cols);
            collect_primitive_searches(body, out);
        }
        Ram::If { body, .. } | Ram::Functional { body, .. } => collect_primitive_searches(body, out),
        Ram::Seq(stmts) | Ram::Par(stmts) => stmts.iter().for_each(|s| collect_primitive_searches(s, out)),
        Ram::Until { body, .. } => collect_primitive_searches(body, out),
        Ram::Project { .. }
        | Ram::Insert { .. }
        | Ram::MergeInto { .. }
        | Ram::Swap { .. }
        | Ram::Purge { .. }
        | Ram::Comment(_)
        | Ram::EstimateJoinSize { .. } => {}
    }
}

/// Kuhn's augmenting-path maximum bipartite matching between two copies
/// of `0..n`, restricted to the `adj` edge set (`a -> b` meaning `a ⊊ b`).
fn max_bipartite_matching(n: usize, adj: &[Vec<usize>]) -> Vec<Option<usize>> {
    let mut match_right: Vec<Option<usize>> = vec![None; n];
    for left in 0..n {
        let mut visited = vec![false; n];
        try_augment(left, adj, &mut visited, &mut match_right);
    }
    match_right
}

fn try_augment(left: usize, adj: &[Vec<usize>], visited: &mut [bool], match_right: &mut [Option<usize>]) -> bool {
    for &right in &adj[left] {
        if visited[right] {
            continue;
        }
        visited[right] = true;
        if match_right[right].is_none() || try_augment(match_right[right].unwrap_or(usize::MAX), adj, visited, match_right) {
            match_right[right] = Some(left);
            return true;
        }
    }
    false
}

/// Decomposes `sets` (deduplicated, as sorted column vectors) into a
/// minimum chain cover, returning each chain as a list of set-indices in
/// increasing-subset order.
fn chain_cover(sets: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = sets.len();
    let as_sets: Vec<BTreeSet<usize>> = sets.iter().map(|s| s.iter().copied().collect()).collect();
    let mut adj = vec![Vec::new(); n];
    for a in 0..n {
        for b in 0..n {
            if a != b && as_sets[a].is_subset(&as_sets[b]) && as_sets[a].len() < as_sets[b].len() {
                adj[a].push(b);
            }
        }
    }
    let match_right = max_bipartite_matching(n, &adj);
    // match_right[j] = Some(i) means i precedes j in its chain; a chain's
    // root is any node that never appears as somebody else's predecessor.
    let is_successor: HashSet<usize> = match_right.iter().filter_map(|m| *m).collect();
    let mut chains = Vec::new();
    for i in 0..n {
        if is_successor.contains(&i) {
            continue;
        }
        let mut chain = vec![i];
        // Follow i -> j where match_right[j] == Some(i).
        let mut current = i;
        loop {
            let next = (0..n).find(|&j| match_right[j] == Some(current));
            match next {
                Some(j) => {
                    chain.push(j);
                    current = j;
                }
                None => break,
            }
        }
        chains.push(chain);
    }
    chains
}

fn order_for_chain(sets: &[Vec<usize>], chain: &[usize], arity: usize) -> SearchOrder {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    for &idx in chain {
        let mut new_cols: Vec<usize> = sets[idx].iter().copied().filter(|c| !seen.contains(c)).collect();
        new_cols.sort_unstable();
        seen.extend(new_cols.iter().copied());
        order.extend(new_cols);
    }
    let mut rest: Vec<usize> = (0..arity).filter(|c| !seen.contains(c)).collect();
    rest.sort_unstable();
    order.extend(rest);
    SearchOrder(order)
}

/// Runs index selection over the whole (hoisted) program, producing one
/// [`IndexCatalogue`] shared by every relation's `Full`/`Delta`/`New`
/// variants. Relations with no observed `Query` get a single identity
/// (sequential) index.
pub fn select_indexes(ram: &Ram, registry: &PredicateRegistry) -> IndexCatalogue {
    let mut observed: HashMap<String, HashSet<Vec<usize>>> = HashMap::new();
    collect_primitive_searches(ram, &mut observed);

    let mut indexes = HashMap::new();
    for name in registry.names() {
        let arity = registry.arity(name);
        let searches = observed.get(name);
        let sets: Vec<Vec<usize>> = match searches {
            Some(s) if !s.is_empty() => {
                let mut v: Vec<Vec<usize>> = s.iter().filter(|cols| !cols.is_empty()).cloned().collect();
                v.sort();
                v
            }
            _ => Vec::new(),
        };
        let orders = if sets.is_empty() {
            vec![SearchOrder::identity(arity)]
        } else {
            chain_cover(&sets).iter().map(|chain| order_for_chain(&sets, chain, arity)).collect()
        };
        indexes.insert(name.to_string(), orders);
    }
    IndexCatalogue { indexes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_primitive_searches_chain_into_one_index() {
        // {0} subset {0,1} subset {0,1,2}: one chain, one index covering all three.
        let sets = vec![vec![0], vec![0, 1], vec![0, 1, 2]];
        let chains = chain_cover(&sets);
        assert_eq!(chains.len(), 1);
        let order = order_for_chain(&sets, &chains[0], 3);
        assert_eq!(order.0, vec![0, 1, 2]);
    }

    #[test]
    fn disjoint_primitive_searches_need_two_indexes() {
        let sets = vec![vec![0], vec![1]];
        let chains = chain_cover(&sets);
        assert_eq!(chains.len(), 2);
    }

    #[test]
    fn unqueried_relation_gets_identity_index() {
        let mut registry = PredicateRegistry::new(8);
        registry.register("never_queried", 3, crate::predicate::Denotation::Relational);
        let ram = Ram::Comment("empty program".into());
        let cat = select_indexes(&ram, &registry);
        assert_eq!(cat.orders("never_queried")[0].0, vec![0, 1, 2]);
    }
}
