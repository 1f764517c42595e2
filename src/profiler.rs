//! # Join Profiler
//!
//! Samples EDB facts, instruments the compiled program with
//! [`Ram::EstimateJoinSize`] probes, and collects per-relation size and
//! duplicate-ratio statistics for [`crate::join_optimizer`] (spec §4.10).
//! Sampling uses `rand`'s `StdRng` seeded from `profiler_seed` so a given
//! program/config pair profiles deterministically.

use crate::ast::{Datalog, Fact};
use crate::ram::{Ram, RowVar};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Everything the profiler needs from `Config` (spec §6), passed by value
/// so this module never depends on `crate::config` directly.
#[derive(Debug, Clone, Copy)]
pub struct ProfilerSettings {
    pub fact_lower_bound: usize,
    pub seed: u64,
    pub minimum_facts: usize,
    pub discrimination: f64,
}

/// Sink a profiling interpreter run reports probe hits to. `record` is
/// called once per `EstimateJoinSize` node reached, per fixpoint
/// iteration it's reached in.
pub trait ProfileSink: Send + Sync {
    fn record(&self, relation: &str, attrs: &[usize], size: usize, duplicates: usize);
}

/// Default in-memory sink: running totals per `(relation, attrs)` pair.
#[derive(Default)]
pub struct CountingSink {
    totals: DashMap<(String, Vec<usize>), (AtomicUsize, AtomicUsize)>,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_profile(self) -> JoinProfile {
        let mut sizes = HashMap::new();
        let mut duplicates = HashMap::new();
        for entry in self.totals.into_iter() {
            let ((rel, attrs), (size, dup)) = entry;
            let size = size.load(Ordering::Relaxed);
            let dup = dup.load(Ordering::Relaxed);
            sizes.entry(rel.clone()).and_modify(|s: &mut usize| *s = (*s).max(size)).or_insert(size);
            let ratio = if size == 0 { 0.0 } else { dup as f64 / size as f64 };
            duplicates.insert((rel, attrs), ratio);
        }
        JoinProfile { sizes, duplicates }
    }
}

impl ProfileSink for CountingSink {
    fn record(&self, relation: &str, attrs: &[usize], size: usize, duplicates: usize) {
        let key = (relation.to_string(), attrs.to_vec());
        let entry = self.totals.entry(key).or_insert_with(|| (AtomicUsize::new(0), AtomicUsize::new(0)));
        entry.0.fetch_max(size, Ordering::Relaxed);
        entry.1.fetch_add(duplicates, Ordering::Relaxed);
    }
}

/// Collected statistics the join optimizer's cost model reads from.
#[derive(Debug, Clone, Default)]
pub struct JoinProfile {
    sizes: HashMap<String, usize>,
    duplicates: HashMap<(String, Vec<usize>), f64>,
}

impl JoinProfile {
    pub fn size_of(&self, relation: &str) -> usize {
        self.sizes.get(relation).copied().unwrap_or(0)
    }

    /// Estimated selectivity `E_i(v | attrs)`: expected number of distinct
    /// bindings per already-bound-attribute combination, derived from the
    /// observed duplicate ratio (1.0, i.e. no narrowing, when unseen).
    pub fn selectivity(&self, relation: &str, attrs: &[usize]) -> f64 {
        let key = (relation.to_string(), attrs.to_vec());
        1.0 - self.duplicates.get(&key).copied().unwrap_or(0.0)
    }
}

/// `Some(sampled)` when `datalog` has enough facts to profile at all
/// (`fact_lower_bound`), `None` when the profiler should be skipped
/// entirely (caller falls back to the compiled-but-unreordered program).
pub fn sample_facts(datalog: &Datalog, settings: &ProfilerSettings) -> Option<Datalog> {
    if datalog.facts.len() < settings.fact_lower_bound {
        return None;
    }
    let mut by_relation: HashMap<&str, Vec<&Fact>> = HashMap::new();
    for fact in &datalog.facts {
        by_relation.entry(fact.sym.as_ref()).or_default().push(fact);
    }
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let p = 1.0 - settings.discrimination;
    let mut sampled = Datalog::new();
    sampled.relations = datalog.relations.clone();
    sampled.rules = datalog.rules.clone();
    sampled.functions = datalog.functions.clone();
    for (_, facts) in by_relation {
        let keep_count = ((facts.len() as f64) * p).round() as usize;
        let keep_count = keep_count.max(settings.minimum_facts.min(facts.len()));
        let mut chosen: Vec<&Fact> = facts
            .iter()
            .filter(|_| rng.gen_bool(p.clamp(0.0, 1.0)))
            .copied()
            .collect();
        if chosen.len() < keep_count {
            for f in &facts {
                if chosen.len() >= keep_count {
                    break;
                }
                if !chosen.iter().any(|c| std::ptr::eq(*c, *f)) {
                    chosen.push(f);
                }
            }
        }
        for f in chosen {
            sampled.add_fact(f.clone());
        }
    }
    Some(sampled)
}

/// Inserts one [`Ram::EstimateJoinSize`] probe immediately after every
/// `Search`/`Query` binds its row variable, recording the scanned
/// relation's current size and the duplicate ratio over the attributes
/// already bound at that point in the join order.
pub fn instrument(ram: Ram) -> Ram {
    instrument_node(ram, &mut Vec::new())
}

fn instrument_node(ram: Ram, bound_attrs: &mut Vec<(RowVar, usize)>) -> Ram {
    match ram {
        Ram::Search { rv, rel, guards, body } => {
            bound_attrs.push((rv, usize::MAX));
            // `join_optimizer::ChainStep::bound_attrs()` reports no bound
            // attributes for a `Search` step (a plain scan binds nothing
            // ahead of time, unlike `Query`'s bindings); key this probe
            // the same way so `selectivity` actually finds it.
            let probe = Ram::EstimateJoinSize { rel: rel.clone(), slot: bound_attrs.len(), attrs: Vec::new() };
            let inner = instrument_node(*body, bound_attrs);
            bound_attrs.pop();
            Ram::Search { rv, rel, guards, body: Box::new(Ram::seq(vec![probe, inner])) }
        }
        Ram::Query { rv, rel, bindings, guards, body } => {
            bound_attrs.push((rv, usize::MAX));
            let attrs: Vec<usize> = bindings.iter().map(|(c, _)| *c).collect();
            let probe = Ram::EstimateJoinSize { rel: rel.clone(), slot: bound_attrs.len(), attrs };
            let inner = instrument_node(*body, bound_attrs);
            bound_attrs.pop();
            Ram::Query { rv, rel, bindings, guards, body: Box::new(Ram::seq(vec![probe, inner])) }
        }
        Ram::If { guards, body } => Ram::If { guards, body: Box::new(instrument_node(*body, bound_attrs)) },
        Ram::Functional { out_rv, arity, func, args, body } => {
            Ram::Functional { out_rv, arity, func, args, body: Box::new(instrument_node(*body, bound_attrs)) }
        }
        Ram::Seq(stmts) => Ram::Seq(stmts.into_iter().map(|s| instrument_node(s, bound_attrs)).collect()),
        Ram::Par(stmts) => Ram::Par(stmts.into_iter().map(|s| instrument_node(s, bound_attrs)).collect()),
        Ram::Until { until_empty, body } => Ram::Until { until_empty, body: Box::new(instrument_node(*body, bound_attrs)) },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Fact;
    use crate::value::Boxed;

    fn fact(sym: &str, v: i64) -> Fact {
        Fact { sym: sym.into(), values: vec![Boxed::Int64(v)] }
    }

    #[test]
    fn below_lower_bound_skips_profiling() {
        let mut d = Datalog::new();
        d.add_fact(fact("edge", 1));
        let settings = ProfilerSettings { fact_lower_bound: 10, seed: 0, minimum_facts: 1, discrimination: 0.2 };
        assert!(sample_facts(&d, &settings).is_none());
    }

    #[test]
    fn sampling_respects_minimum_facts() {
        let mut d = Datalog::new();
        for i in 0..50 {
            d.add_fact(fact("edge", i));
        }
        let settings = ProfilerSettings { fact_lower_bound: 10, seed: 7, minimum_facts: 20, discrimination: 0.9 };
        let sampled = sample_facts(&d, &settings).unwrap();
        assert!(sampled.facts.len() >= 20);
    }

    #[test]
    fn counting_sink_tracks_max_size_and_duplicate_ratio() {
        let sink = CountingSink::new();
        sink.record("edge", &[0], 100, 10);
        sink.record("edge", &[0], 120, 20);
        let profile = sink.into_profile();
        assert_eq!(profile.size_of("edge"), 120);
        assert!(profile.selectivity("edge", &[0]) < 1.0);
    }
}
