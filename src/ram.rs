//! # RAM AST (high-level)
//!
//! The Relational Algebra Machine intermediate representation the compiler
//! emits and the simplifier/hoister/index-selector/join-optimizer/provenance
//! passes rewrite, before [`crate::lowering`] resolves it to an executable
//! form. Closed sum type, one `match` per pass (spec §9 design note).
//!
//! ```text
//! Ram::Seq([
//!   Ram::Search(rv0, Edge::Full, [],
//!     Ram::Project([rv0.0, rv0.1], Path::New)),
//!   Ram::MergeInto(Path::New, Path::Full),
//!   ...
//! ])
//! ```

use crate::predicate::PredSym;
use crate::value::Boxed;
use std::sync::Arc;

/// Unique identifier for one occurrence of an atom in a rule body; the RAM
/// equivalent of a loop variable bound while iterating a `Search`/`Query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowVar(pub u32);

/// A value computable at RAM-interpretation time from the current
/// environment: an attribute of a bound row variable, a boxed constant, or
/// a pure function applied to other `RamTerm`s.
#[derive(Debug, Clone)]
pub enum RamTerm {
    Attr(RowVar, usize),
    Const(Boxed),
    App(Arc<str>, Vec<RamTerm>),
    /// The lattice payload currently bound to a row variable scanning a
    /// `Latticenal` relation (the index's payload half, not a tuple
    /// column — see spec §4.1/§3 and `value::Tuple`'s doc comment).
    LatticeValue(RowVar),
}

impl RamTerm {
    pub fn row_vars(&self, out: &mut Vec<RowVar>) {
        match self {
            RamTerm::Attr(rv, _) | RamTerm::LatticeValue(rv) => out.push(*rv),
            RamTerm::Const(_) => {}
            RamTerm::App(_, args) => args.iter().for_each(|a| a.row_vars(out)),
        }
    }

    /// `true` if this term references no `RowVar` at all — a value the
    /// compiled-in environment can evaluate before any tuple is bound,
    /// used by hoisting to lift guards above their `Search`/`Query`.
    pub fn is_ground(&self) -> bool {
        let mut out = Vec::new();
        self.row_vars(&mut out);
        out.is_empty()
    }
}

/// Structural equality over `RamTerm`, used to detect tautologies
/// (`x = x`) and literal-equality conflicts (spec §4.7/§4.8). Distinct
/// from any derived `PartialEq` since `Boxed`'s own equality already
/// special-cases cross-variant comparisons.
pub fn term_eq(a: &RamTerm, b: &RamTerm) -> bool {
    match (a, b) {
        (RamTerm::Attr(rv1, c1), RamTerm::Attr(rv2, c2)) => rv1 == rv2 && c1 == c2,
        (RamTerm::Const(x), RamTerm::Const(y)) => x == y,
        (RamTerm::LatticeValue(rv1), RamTerm::LatticeValue(rv2)) => rv1 == rv2,
        (RamTerm::App(f1, a1), RamTerm::App(f2, a2)) => {
            f1 == f2 && a1.len() == a2.len() && a1.iter().zip(a2).all(|(x, y)| term_eq(x, y))
        }
        _ => false,
    }
}

/// The `EBoolExp` surface before lowering: user guards, lattice tests,
/// equality/inequality, negative-atom membership tests, and the
/// `¬is_empty` short-circuits hoisting inserts (spec §4.8).
#[derive(Debug, Clone)]
pub enum BoolExpr {
    /// `Guard{0..5}`: a named boolean function applied to `args`.
    Guard(Arc<str>, Vec<RamTerm>),
    Eq(RamTerm, RamTerm),
    Neq(RamTerm, RamTerm),
    /// Lattice read test: `bot <= val` via the relation's `leq` function.
    Leq(PredSym, RamTerm, RamTerm),
    /// Lattice read test: `val != bot`.
    NotBot(PredSym, RamTerm),
    MemberOf(PredSym, Vec<RamTerm>),
    IsEmpty(PredSym),
    Not(Box<BoolExpr>),
}

impl BoolExpr {
    pub fn not_member_of(rel: PredSym, args: Vec<RamTerm>) -> Self {
        BoolExpr::Not(Box::new(BoolExpr::MemberOf(rel, args)))
    }
}

/// A term computed while projecting a rule's head into its target
/// relation.
#[derive(Debug, Clone)]
pub enum ProjectTerm {
    Attr(RowVar, usize),
    Const(Boxed),
    App(Arc<str>, Vec<ProjectTerm>),
    /// Provenance depth: `1 + max(depth(rv) for rv in _.0)`, 0 if the list
    /// is empty (an EDB-derived fact; spec §4.11).
    ProvMax(Vec<RowVar>),
    /// The originating rule number stamped by provenance augmentation, or
    /// -1/-2 for EDB/negative per spec §4.11.
    RuleNo(i64),
    /// Carries a row variable's bound lattice payload into a `Latticenal`
    /// relation's projection (the value half of `put_with`).
    LatticeValue(RowVar),
}

/// High-level RAM statement.
#[derive(Debug, Clone)]
pub enum Ram {
    /// Full nested-loop scan of `rel`, binding each tuple to `rv` in turn.
    Search { rv: RowVar, rel: PredSym, guards: Vec<BoolExpr>, body: Box<Ram> },
    /// Range-scan of `rel` using `bindings` (column -> equality term) as
    /// the index lower/upper bound; `guards` are residual tests not
    /// foldable into the bound.
    Query { rv: RowVar, rel: PredSym, bindings: Vec<(usize, RamTerm)>, guards: Vec<BoolExpr>, body: Box<Ram> },
    /// Evaluate `terms` against the environment and insert into `into`
    /// (`put` for `Relational`, `put_with(join)` for `Latticenal`).
    Project { terms: Vec<ProjectTerm>, into: PredSym },
    /// Direct insertion of already-boxed fact tuples (used for seeding EDB
    /// facts and model union), bypassing term evaluation.
    Insert { tuples: Vec<Vec<Boxed>>, into: PredSym },
    If { guards: Vec<BoolExpr>, body: Box<Ram> },
    /// `out_vars` bound from `f(in_terms)`, readable downstream as
    /// `RamTerm::Attr(out_rv, i)`.
    Functional { out_rv: RowVar, arity: usize, func: Arc<str>, args: Vec<RamTerm>, body: Box<Ram> },
    MergeInto { from: PredSym, into: PredSym },
    Swap { a: PredSym, b: PredSym },
    Purge { rel: PredSym },
    Seq(Vec<Ram>),
    Par(Vec<Ram>),
    /// Repeats `body` until every relation in `until_empty` is empty.
    Until { until_empty: Vec<PredSym>, body: Box<Ram> },
    /// Join-profiler instrumentation (spec §4.10): when interpreted under
    /// a `ProfileSink`, records the current size of `rel` and the
    /// duplicate ratio over `attrs` at this point in the program. A no-op
    /// outside of profiling; removed before the profiled-off interpreter
    /// run.
    EstimateJoinSize { rel: PredSym, slot: usize, attrs: Vec<usize> },
    Comment(Arc<str>),
}

impl Ram {
    pub fn seq(stmts: Vec<Ram>) -> Ram {
        let mut flat = Vec::with_capacity(stmts.len());
        for s in stmts {
            match s {
                Ram::Seq(inner) => flat.extend(inner),
                Ram::Comment(_) => flat.push(s),
                other => flat.push(other),
            }
        }
        Ram::Seq(flat)
    }

    pub fn par(stmts: Vec<Ram>) -> Ram {
        if stmts.len() == 1 {
            return stmts.into_iter().next().unwrap_or_else(|| crate::error::bug!("par() got empty after len check"));
        }
        Ram::Par(stmts)
    }

    /// Every `RowVar` this node or its descendants reference, used by
    /// hoisting/lowering to decide which slots a subtree needs resolved.
    pub fn referenced_row_vars(&self, out: &mut Vec<RowVar>) {
        match self {
            Ram::Search { rv, guards, body, .. } => {
                out.push(*rv);
                guards.iter().for_each(|g| bool_expr_row_vars(g, out));
                body.referenced_row_vars(out);
            }
            Ram::Query { rv, bindings, guards, body, .. } => {
                out.push(*rv);
                bindings.iter().for_each(|(_, t)| t.row_vars(out));
                guards.iter().for_each(|g| bool_expr_row_vars(g, out));
                body.referenced_row_vars(out);
            }
            Ram::Project { terms, .. } => terms.iter().for_each(|t| project_term_row_vars(t, out)),
            Ram::Insert { .. } => {}
            Ram::If { guards, body } => {
                guards.iter().for_each(|g| bool_expr_row_vars(g, out));
                body.referenced_row_vars(out);
            }
            Ram::Functional { out_rv, args, body, .. } => {
                out.push(*out_rv);
                args.iter().for_each(|a| a.row_vars(out));
                body.referenced_row_vars(out);
            }
            Ram::MergeInto { .. } | Ram::Swap { .. } | Ram::Purge { .. } | Ram::Comment(_) | Ram::EstimateJoinSize { .. } => {}
            Ram::Seq(stmts) | Ram::Par(stmts) => stmts.iter().for_each(|s| s.referenced_row_vars(out)),
            Ram::Until { body, .. } => body.referenced_row_vars(out),
        }
    }
}

fn bool_expr_row_vars(expr: &BoolExpr, out: &mut Vec<RowVar>) {
    match expr {
        BoolExpr::Guard(_, args) => args.iter().for_each(|a| a.row_vars(out)),
        BoolExpr::Eq(a, b) | BoolExpr::Neq(a, b) => {
            a.row_vars(out);
            b.row_vars(out);
        }
        BoolExpr::Leq(_, a, b) => {
            a.row_vars(out);
            b.row_vars(out);
        }
        BoolExpr::NotBot(_, a) => a.row_vars(out),
        BoolExpr::MemberOf(_, args) => args.iter().for_each(|a| a.row_vars(out)),
        BoolExpr::IsEmpty(_) => {}
        BoolExpr::Not(inner) => bool_expr_row_vars(inner, out),
    }
}

fn project_term_row_vars(term: &ProjectTerm, out: &mut Vec<RowVar>) {
    match term {
        ProjectTerm::Attr(rv, _) => out.push(*rv),
        ProjectTerm::Const(_) | ProjectTerm::RuleNo(_) => {}
        ProjectTerm::App(_, args) => args.iter().for_each(|a| project_term_row_vars(a, out)),
        ProjectTerm::ProvMax(rvs) => out.extend(rvs),
        ProjectTerm::LatticeValue(rv) => out.push(*rv),
    }
}
