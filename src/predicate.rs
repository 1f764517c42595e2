//! # Predicate Registry, Equality Mapping & Denotation
//!
//! Owns three closely related pieces of global bookkeeping that the rest of
//! the compiler leans on:
//!
//! - [`PredSym`] / [`RelSym`] / [`Denotation`]: the identity and "shape" of a
//!   logical predicate.
//! - [`PredicateRegistry`]: allocates the `Full` / `Delta` / `New` id triple
//!   per logical predicate (spec §4.3).
//! - [`UnifiedPosition`] / [`PositionRegistry`]: the union-find closure over
//!   every RAM identifier that must share a boxing encoding (spec §4.3),
//!   consumed by [`crate::boxing`].
//!
//! ```text
//! PredicateRegistry
//!   name -> PredId
//!     `-- Full  = PredId
//!     `-- Delta = PredId + max_ids
//!     `-- New   = PredId + 2*max_ids
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Which of the three materialized variants of a predicate an identifier
/// refers to. `Full` is the stable relation visible across strata; `Delta`
/// holds the tuples produced by the previous semi-naive iteration; `New`
/// accumulates the tuples produced by the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    Full,
    Delta,
    New,
}

/// `(name, id)` with a globally unique 64-bit id. Two `PredSym`s are equal
/// iff their ids match; `name` is carried for diagnostics and marshalling
/// only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredSym {
    pub name: Arc<str>,
    pub id: u64,
    pub variant: Variant,
}

impl PredSym {
    /// The `Full`/base identity of this predicate, ignoring variant.
    pub fn base_id(&self, max_ids: u64) -> u64 {
        match self.variant {
            Variant::Full => self.id,
            Variant::Delta => self.id - max_ids,
            Variant::New => self.id - 2 * max_ids,
        }
    }
}

impl PartialEq for PredSym {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for PredSym {}
impl std::hash::Hash for PredSym {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Whether a relation is a plain set (`Relational`) or a tuple -> lattice
/// element map (`Latticenal`). The four lattice operators are identified by
/// name and resolved against a [`crate::ast::FunctionRegistry`] supplied by
/// the embedder, mirroring how `App`/`Guard`/`Functional` payload functions
/// are resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Denotation {
    Relational,
    Latticenal {
        /// Name of the nullary function yielding bot.
        bot: Arc<str>,
        /// Name of the binary `<=` predicate.
        leq: Arc<str>,
        /// Name of the binary join (`glb`-complement) function.
        join: Arc<str>,
        /// Name of the binary meet function.
        meet: Arc<str>,
    },
}

impl Denotation {
    pub fn is_lattice(&self) -> bool {
        matches!(self, Denotation::Latticenal { .. })
    }
}

/// Arity and denotation together, identifying the physical shape of one
/// logical predicate. Tuples of a lattice relation carry the value as a
/// trailing component; `arity` counts only the set/key columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelSym {
    pub pred: PredSym,
    pub arity: usize,
    pub denotation: Denotation,
}

impl RelSym {
    /// Arity of the physical tuple stored in an index: key columns, plus one
    /// trailing lattice-value column for `Latticenal` relations.
    pub fn tuple_arity(&self) -> usize {
        self.arity
    }
}

/// Per-logical-predicate bookkeeping: name, arity, denotation, and the three
/// allocated ids.
#[derive(Debug, Clone)]
struct PredicateEntry {
    name: Arc<str>,
    arity: usize,
    denotation: Denotation,
    base_id: u64,
}

/// Allocates `Full`/`Delta`/`New` id triples for every logical predicate
/// named by a Datalog program. Ids are offset by multiples of `max_ids`
/// (an upper bound on how many logical predicates will ever be registered)
/// so `Full`, `Delta`, `New` of the same predicate can be recovered from one
/// another by arithmetic alone (spec §3 "Predicate symbol").
pub struct PredicateRegistry {
    max_ids: u64,
    by_name: HashMap<Arc<str>, PredicateEntry>,
    next_id: u64,
}

impl PredicateRegistry {
    pub fn new(max_ids: u64) -> Self {
        PredicateRegistry {
            max_ids,
            by_name: HashMap::new(),
            next_id: 0,
        }
    }

    /// Registers a logical predicate if not already present; returns its
    /// `Full` symbol. Re-registering the same name with a different arity
    /// or denotation is a schema bug.
    pub fn register(&mut self, name: impl Into<Arc<str>>, arity: usize, denotation: Denotation) -> PredSym {
        let name = name.into();
        if let Some(entry) = self.by_name.get(&name) {
            if entry.arity != arity {
                crate::error::bug!("predicate {name} re-registered with arity {arity}, expected {}", entry.arity);
            }
            return self.full(&name);
        }
        let base_id = self.next_id;
        self.next_id += 1;
        if self.next_id > self.max_ids {
            crate::error::bug!("predicate registry exceeded max_ids={}", self.max_ids);
        }
        self.by_name.insert(
            name.clone(),
            PredicateEntry { name: name.clone(), arity, denotation, base_id },
        );
        self.full(&name)
    }

    fn entry(&self, name: &str) -> &PredicateEntry {
        self.by_name
            .get(name)
            .unwrap_or_else(|| crate::error::bug!("predicate {name} is not registered"))
    }

    pub fn full(&self, name: &str) -> PredSym {
        let e = self.entry(name);
        PredSym { name: e.name.clone(), id: e.base_id, variant: Variant::Full }
    }

    pub fn delta(&self, name: &str) -> PredSym {
        let e = self.entry(name);
        PredSym { name: e.name.clone(), id: e.base_id + self.max_ids, variant: Variant::Delta }
    }

    pub fn new_variant(&self, name: &str) -> PredSym {
        let e = self.entry(name);
        PredSym { name: e.name.clone(), id: e.base_id + 2 * self.max_ids, variant: Variant::New }
    }

    pub fn variant(&self, name: &str, variant: Variant) -> PredSym {
        match variant {
            Variant::Full => self.full(name),
            Variant::Delta => self.delta(name),
            Variant::New => self.new_variant(name),
        }
    }

    pub fn rel_sym(&self, name: &str, variant: Variant) -> RelSym {
        let e = self.entry(name);
        RelSym { pred: self.variant(name, variant), arity: e.arity, denotation: e.denotation.clone() }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(|s| s.as_ref())
    }

    pub fn arity(&self, name: &str) -> usize {
        self.entry(name).arity
    }

    pub fn denotation(&self, name: &str) -> &Denotation {
        &self.entry(name).denotation
    }

    pub fn max_ids(&self) -> u64 {
        self.max_ids
    }
}

/// Equivalence class of RAM identifiers that must share a boxing encoding
/// (spec §4.3). Opaque after construction: only [`PositionRegistry::find`]
/// produces the canonical id that [`crate::boxing::BoxingTable`] keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnifiedPosition(pub u32);

/// Union-find over freshly allocated [`UnifiedPosition`]s. The compiler
/// allocates one position per `(RowVar, column)` and per relation column it
/// encounters while walking a stratified program, then unions according to
/// the rules in spec §4.3 (same-column occurrences, `Full`/`Delta`/`New`
/// sharing, merge/swap pairing, `Eq` terms).
pub struct PositionRegistry {
    parent: Vec<u32>,
}

impl PositionRegistry {
    pub fn new() -> Self {
        PositionRegistry { parent: Vec::new() }
    }

    pub fn fresh(&mut self) -> UnifiedPosition {
        let id = self.parent.len() as u32;
        self.parent.push(id);
        UnifiedPosition(id)
    }

    fn find_root(&mut self, x: u32) -> u32 {
        if self.parent[x as usize] != x {
            let root = self.find_root(self.parent[x as usize]);
            self.parent[x as usize] = root;
        }
        self.parent[x as usize]
    }

    /// Canonical position for `p` after all unions so far. Stable under
    /// further unions (path compression keeps old lookups valid, they just
    /// resolve to a possibly coarser root).
    pub fn find(&mut self, p: UnifiedPosition) -> UnifiedPosition {
        UnifiedPosition(self.find_root(p.0))
    }

    pub fn union(&mut self, a: UnifiedPosition, b: UnifiedPosition) {
        let ra = self.find_root(a.0);
        let rb = self.find_root(b.0);
        if ra != rb {
            self.parent[ra as usize] = rb;
        }
    }
}

impl Default for PositionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Final, union-find-closed column identity assignment (spec §4.3):
/// every row variable's bound attribute and every relation's column
/// resolve to the same [`UnifiedPosition`] wherever the same logical
/// value can appear, so [`crate::boxing::BoxingTable`] never encodes the
/// same string/object under two different codes. Built once by
/// [`crate::compiler::compile`] and frozen for the rest of the pipeline.
#[derive(Debug, Default)]
pub struct PositionAssignment {
    row_var_attr: HashMap<(u32, usize), UnifiedPosition>,
    column: HashMap<(u64, usize), UnifiedPosition>,
}

impl PositionAssignment {
    pub fn row_var_attr(&self, rv: u32, col: usize) -> UnifiedPosition {
        *self
            .row_var_attr
            .get(&(rv, col))
            .unwrap_or_else(|| crate::error::bug!("no unified position recorded for row var {rv} column {col}"))
    }

    pub fn column(&self, base_pred_id: u64, col: usize) -> UnifiedPosition {
        *self
            .column
            .get(&(base_pred_id, col))
            .unwrap_or_else(|| crate::error::bug!("no unified position recorded for predicate {base_pred_id} column {col}"))
    }
}

/// Incrementally builds a [`PositionAssignment`] while the compiler walks a
/// stratified program. `column_pos` is keyed by the relation's `Full` id so
/// `Full`/`Delta`/`New` of the same predicate always resolve to the same
/// identity (spec §4.3's variant-sharing rule) without an explicit union.
#[derive(Default)]
pub struct PositionBuilder {
    registry: PositionRegistry,
    column: HashMap<(u64, usize), UnifiedPosition>,
    row_var_attr: HashMap<(u32, usize), UnifiedPosition>,
}

impl PositionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lazily allocates the position for `(base_pred_id, col)`.
    pub fn column_pos(&mut self, base_pred_id: u64, col: usize) -> UnifiedPosition {
        if let Some(&p) = self.column.get(&(base_pred_id, col)) {
            return p;
        }
        let p = self.registry.fresh();
        self.column.insert((base_pred_id, col), p);
        p
    }

    /// Allocates a fresh position not backed by any relation column, used
    /// for a `Functional`'s output row variable before it is (possibly)
    /// unified with whatever it's bound against downstream.
    pub fn fresh(&mut self) -> UnifiedPosition {
        self.registry.fresh()
    }

    /// Records that `(rv, col)` currently carries position `pos` (the
    /// identity, not yet necessarily the canonical root — `finish`
    /// resolves every recorded site through the registry at the end, so
    /// later unions are reflected even for sites recorded earlier).
    pub fn bind_row_var_attr(&mut self, rv: u32, col: usize, pos: UnifiedPosition) {
        self.row_var_attr.insert((rv, col), pos);
    }

    pub fn union(&mut self, a: UnifiedPosition, b: UnifiedPosition) {
        self.registry.union(a, b);
    }

    pub fn finish(mut self) -> PositionAssignment {
        let column = self.column.iter().map(|(&k, &p)| (k, self.registry.find(p))).collect();
        let row_var_attr = self.row_var_attr.iter().map(|(&k, &p)| (k, self.registry.find(p))).collect();
        PositionAssignment { row_var_attr, column }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_allocates_disjoint_variant_ids() {
        let mut reg = PredicateRegistry::new(100);
        reg.register("edge", 2, Denotation::Relational);
        let full = reg.full("edge");
        let delta = reg.delta("edge");
        let new = reg.new_variant("edge");
        assert_eq!(full.id, 0);
        assert_eq!(delta.id, 100);
        assert_eq!(new.id, 200);
        assert_eq!(delta.base_id(100), 0);
        assert_eq!(new.base_id(100), 0);
    }

    #[test]
    fn registering_twice_is_idempotent() {
        let mut reg = PredicateRegistry::new(10);
        let a = reg.register("p", 1, Denotation::Relational);
        let b = reg.register("p", 1, Denotation::Relational);
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic(expected = "re-registered")]
    fn registering_with_different_arity_is_a_bug() {
        let mut reg = PredicateRegistry::new(10);
        reg.register("p", 1, Denotation::Relational);
        reg.register("p", 2, Denotation::Relational);
    }

    #[test]
    fn union_find_closes_equality_classes() {
        let mut pr = PositionRegistry::new();
        let a = pr.fresh();
        let b = pr.fresh();
        let c = pr.fresh();
        pr.union(a, b);
        pr.union(b, c);
        assert_eq!(pr.find(a), pr.find(c));
    }
}
