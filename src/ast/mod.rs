//! # Datalog AST & Denotation
//!
//! The surface the compiler consumes. There is no text-format parser in
//! this crate (see spec §1, "out of scope"); programs are built directly
//! with [`Rule`]/[`Fact`]/the [`builders`] fluent API, the way the embedding
//! layer's arity-N injection wrappers are expected to build them.
//!
//! ```text
//! Datalog
//!   |-- relations: name -> (arity, Denotation)
//!   |-- facts:     Vec<Fact>             (Lit-only heads, empty bodies)
//!   `-- rules:     Vec<Rule>
//!         |-- head: HeadAtom             (Var | Lit | App0..5 terms)
//!         `-- body: Vec<BodyLiteral>
//!               |-- Atom(BodyAtom)       (sym, denotation, polarity, fixity, terms)
//!               |-- Guard(Guard)         (Guard0..5)
//!               `-- Functional(Functional)
//! ```

pub mod builders;

use crate::predicate::Denotation;
use crate::value::Boxed;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A body-position term: a bound/binding variable, a literal constant, or a
/// wildcard that matches anything and binds nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    Var(Arc<str>),
    Lit(Boxed),
    Wild,
}

impl Term {
    pub fn var(name: impl Into<Arc<str>>) -> Self {
        Term::Var(name.into())
    }

    pub fn free_var(&self) -> Option<&Arc<str>> {
        match self {
            Term::Var(v) => Some(v),
            _ => None,
        }
    }
}

/// A head-position term: like [`Term`] but constants must be literal (a
/// fact's head is `Lit`-only, spec §4.4), and a pure function may be
/// applied to up to five variables (`App0..5`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HeadTerm {
    Var(Arc<str>),
    Lit(Boxed),
    /// Pure function applied to 0..=5 bound variables, resolved by name
    /// against a [`FunctionRegistry`] at compile time.
    App(Arc<str>, Vec<Arc<str>>),
}

/// Whether a body atom reads the stable store or still participates in the
/// semi-naive fixpoint for its own stratum. EDB atoms are never rewritten to
/// read `Delta` during incremental codegen (spec §4.6 Phase B); IDB atoms
/// are the recursion targets that get a `Delta`-reading copy per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fixity {
    Edb,
    Idb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    Positive,
    Negative,
}

/// One relational/lattice atom in a rule body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyAtom {
    pub sym: Arc<str>,
    pub denotation: Denotation,
    pub polarity: Polarity,
    pub fixity: Fixity,
    pub terms: Vec<Term>,
}

impl BodyAtom {
    pub fn is_negative(&self) -> bool {
        self.polarity == Polarity::Negative
    }
}

/// A user guard of arity 0..=5: a named boolean function applied to bound
/// variables (or, for a `Guard0`, to no variables at all — a literal
/// true/false that the simplifier can fold away).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guard {
    pub func: Arc<str>,
    pub args: Vec<Term>,
}

/// `Functional(out_vars, f, in_vars)`: evaluates `f` once `in_vars` are all
/// ground and binds `out_vars` to the result. Functionals must run after
/// every input variable is bound (spec §9, join-optimizer interaction) and
/// are incompatible with provenance (spec §4.11, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Functional {
    pub out_vars: Vec<Arc<str>>,
    pub func: Arc<str>,
    pub in_vars: Vec<Arc<str>>,
}

/// One body literal: a relational/lattice read, a guard, or a functional
/// call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BodyLiteral {
    Atom(BodyAtom),
    Guard(Guard),
    Functional(Functional),
}

/// `head :- body`. Facts are represented separately (see [`Fact`]) since
/// their head is restricted to literals and their body is always empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub head_sym: Arc<str>,
    pub head_terms: Vec<HeadTerm>,
    pub body: Vec<BodyLiteral>,
}

impl Rule {
    /// Every `Var` occurring anywhere in the body, in first-occurrence
    /// order — used by safety-checking and by hoisting.
    pub fn body_vars(&self) -> Vec<Arc<str>> {
        let mut seen = Vec::new();
        let mut push = |v: &Arc<str>| {
            if !seen.contains(v) {
                seen.push(v.clone());
            }
        };
        for lit in &self.body {
            match lit {
                BodyLiteral::Atom(a) => {
                    for t in &a.terms {
                        if let Term::Var(v) = t {
                            push(v);
                        }
                    }
                }
                BodyLiteral::Guard(g) => {
                    for t in &g.args {
                        if let Term::Var(v) = t {
                            push(v);
                        }
                    }
                }
                BodyLiteral::Functional(f) => {
                    for v in f.in_vars.iter().chain(f.out_vars.iter()) {
                        push(v);
                    }
                }
            }
        }
        seen
    }

    /// Variables bound by positive body atoms only (what a safe rule's head
    /// and negative/guard positions are allowed to reference).
    pub fn positively_bound_vars(&self) -> std::collections::HashSet<Arc<str>> {
        let mut bound = std::collections::HashSet::new();
        for lit in &self.body {
            if let BodyLiteral::Atom(a) = lit {
                if a.polarity == Polarity::Positive {
                    for t in &a.terms {
                        if let Term::Var(v) = t {
                            bound.insert(v.clone());
                        }
                    }
                }
            }
        }
        bound
    }

    /// Safety check (spec §3 invariant: "no rule body atom has an unbound
    /// variable at compile time"): every variable in the head, in a
    /// negative atom, in a guard, or in a functional's `in_vars` must be
    /// bound by some positive body atom.
    pub fn check_safe(&self) -> Result<(), crate::error::SolveError> {
        let bound = self.positively_bound_vars();
        for t in &self.head_terms {
            match t {
                HeadTerm::Var(v) if !bound.contains(v) => {
                    return Err(crate::error::SolveError::UnsafeRule(v.to_string()));
                }
                HeadTerm::App(_, args) => {
                    for v in args {
                        if !bound.contains(v) {
                            return Err(crate::error::SolveError::UnsafeRule(v.to_string()));
                        }
                    }
                }
                _ => {}
            }
        }
        for lit in &self.body {
            match lit {
                BodyLiteral::Atom(a) if a.is_negative() => {
                    for t in &a.terms {
                        if let Term::Var(v) = t {
                            if !bound.contains(v) {
                                return Err(crate::error::SolveError::UnsafeRule(v.to_string()));
                            }
                        }
                    }
                }
                BodyLiteral::Guard(g) => {
                    for t in &g.args {
                        if let Term::Var(v) = t {
                            if !bound.contains(v) {
                                return Err(crate::error::SolveError::UnsafeRule(v.to_string()));
                            }
                        }
                    }
                }
                BodyLiteral::Functional(f) => {
                    for v in &f.in_vars {
                        if !bound.contains(v) {
                            return Err(crate::error::SolveError::UnsafeRule(v.to_string()));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// A constraint whose head is literal-only and whose body is empty.
/// `values` holds the relation's key columns; for a `Latticenal` relation
/// the trailing value is the lattice element the fact asserts for that key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub sym: Arc<str>,
    pub values: Vec<Boxed>,
}

/// Pure functions supplied by the embedder, looked up by name. `funcs`
/// backs `App`/`Functional`/lattice `join`/`meet`/`bot`; `preds` backs
/// `Guard` and lattice `leq`. This crate only calls them by name — wiring
/// concrete closures in is the out-of-scope host embedding layer's job
/// (spec §1).
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    funcs: HashMap<Arc<str>, Arc<dyn Fn(&[Boxed]) -> Boxed + Send + Sync>>,
    preds: HashMap<Arc<str>, Arc<dyn Fn(&[Boxed]) -> bool + Send + Sync>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_func(
        &mut self,
        name: impl Into<Arc<str>>,
        f: impl Fn(&[Boxed]) -> Boxed + Send + Sync + 'static,
    ) {
        self.funcs.insert(name.into(), Arc::new(f));
    }

    pub fn register_pred(
        &mut self,
        name: impl Into<Arc<str>>,
        f: impl Fn(&[Boxed]) -> bool + Send + Sync + 'static,
    ) {
        self.preds.insert(name.into(), Arc::new(f));
    }

    pub fn call_func(&self, name: &str, args: &[Boxed]) -> Boxed {
        (self
            .funcs
            .get(name)
            .unwrap_or_else(|| crate::error::bug!("unknown function {name}")))(args)
    }

    pub fn call_pred(&self, name: &str, args: &[Boxed]) -> bool {
        (self
            .preds
            .get(name)
            .unwrap_or_else(|| crate::error::bug!("unknown predicate function {name}")))(args)
    }

    /// Absorbs `other`'s bindings, keeping `self`'s on name collision — used
    /// by [`crate::union`] to combine two programs' function registries.
    pub fn merge_from(&mut self, other: &FunctionRegistry) {
        for (name, f) in &other.funcs {
            self.funcs.entry(name.clone()).or_insert_with(|| f.clone());
        }
        for (name, f) in &other.preds {
            self.preds.entry(name.clone()).or_insert_with(|| f.clone());
        }
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("funcs", &self.funcs.keys().collect::<Vec<_>>())
            .field("preds", &self.preds.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Declared schema for a relation: arity and denotation, independent of
/// whether any facts or rules mention it yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDecl {
    pub name: Arc<str>,
    pub arity: usize,
    pub denotation: Denotation,
}

/// A full Datalog program: declared relation schemas, facts, rules, and the
/// pure-function bindings they reference.
#[derive(Clone, Default)]
pub struct Datalog {
    pub relations: Vec<RelationDecl>,
    pub facts: Vec<Fact>,
    pub rules: Vec<Rule>,
    pub functions: FunctionRegistry,
}

impl std::fmt::Debug for Datalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datalog")
            .field("relations", &self.relations)
            .field("facts", &self.facts.len())
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl Datalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<Arc<str>>, arity: usize, denotation: Denotation) {
        let name = name.into();
        if !self.relations.iter().any(|r| r.name == name) {
            self.relations.push(RelationDecl { name, arity, denotation });
        }
    }

    pub fn add_fact(&mut self, fact: Fact) {
        self.facts.push(fact);
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn denotation_of(&self, name: &str) -> Option<&Denotation> {
        self.relations.iter().find(|r| r.name.as_ref() == name).map(|r| &r.denotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(sym: &str, vars: &[&str]) -> BodyLiteral {
        BodyLiteral::Atom(BodyAtom {
            sym: sym.into(),
            denotation: Denotation::Relational,
            polarity: Polarity::Positive,
            fixity: Fixity::Idb,
            terms: vars.iter().map(|v| Term::var(*v)).collect(),
        })
    }

    #[test]
    fn safe_rule_passes() {
        let rule = Rule {
            head_sym: "path".into(),
            head_terms: vec![HeadTerm::Var("x".into()), HeadTerm::Var("z".into())],
            body: vec![atom("edge", &["x", "y"]), atom("edge", &["y", "z"])],
        };
        assert!(rule.check_safe().is_ok());
    }

    #[test]
    fn unsafe_head_var_is_rejected() {
        let rule = Rule {
            head_sym: "path".into(),
            head_terms: vec![HeadTerm::Var("x".into()), HeadTerm::Var("z".into())],
            body: vec![atom("edge", &["x", "y"])],
        };
        assert!(rule.check_safe().is_err());
    }

    #[test]
    fn negative_atom_must_be_bound_elsewhere() {
        let mut neg = atom("has_parent", &["c"]);
        if let BodyLiteral::Atom(a) = &mut neg {
            a.polarity = Polarity::Negative;
        }
        let rule = Rule {
            head_sym: "orphan".into(),
            head_terms: vec![HeadTerm::Var("c".into())],
            body: vec![atom("person", &["c"]), neg],
        };
        assert!(rule.check_safe().is_ok());
    }
}
