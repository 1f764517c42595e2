//! Fluent builders for programmatic AST construction, mirroring the
//! teacher crate's `AtomBuilder`/`RuleBuilder` shape (see
//! `ast::builders` in the example pack) but over this crate's closed
//! [`super::Term`]/[`super::BodyLiteral`] set.

use super::{BodyAtom, BodyLiteral, Fixity, Guard, HeadTerm, Polarity, Rule, Term};
use crate::predicate::Denotation;
use crate::value::Boxed;
use std::sync::Arc;

/// Builds one positive or negative body atom.
pub struct AtomBuilder {
    sym: Arc<str>,
    denotation: Denotation,
    polarity: Polarity,
    fixity: Fixity,
    terms: Vec<Term>,
}

impl AtomBuilder {
    pub fn new(sym: impl Into<Arc<str>>) -> Self {
        AtomBuilder {
            sym: sym.into(),
            denotation: Denotation::Relational,
            polarity: Polarity::Positive,
            fixity: Fixity::Idb,
            terms: Vec::new(),
        }
    }

    pub fn var(mut self, name: impl Into<Arc<str>>) -> Self {
        self.terms.push(Term::Var(name.into()));
        self
    }

    pub fn lit(mut self, value: Boxed) -> Self {
        self.terms.push(Term::Lit(value));
        self
    }

    pub fn wild(mut self) -> Self {
        self.terms.push(Term::Wild);
        self
    }

    pub fn negated(mut self) -> Self {
        self.polarity = Polarity::Negative;
        self
    }

    pub fn edb(mut self) -> Self {
        self.fixity = Fixity::Edb;
        self
    }

    pub fn lattice(mut self, denotation: Denotation) -> Self {
        self.denotation = denotation;
        self
    }

    pub fn build(self) -> BodyAtom {
        BodyAtom {
            sym: self.sym,
            denotation: self.denotation,
            polarity: self.polarity,
            fixity: self.fixity,
            terms: self.terms,
        }
    }
}

/// Builds a rule, accumulating body literals in the order they're added.
pub struct RuleBuilder {
    head_sym: Arc<str>,
    head_terms: Vec<HeadTerm>,
    body: Vec<BodyLiteral>,
}

impl RuleBuilder {
    pub fn new(head_sym: impl Into<Arc<str>>) -> Self {
        RuleBuilder { head_sym: head_sym.into(), head_terms: Vec::new(), body: Vec::new() }
    }

    pub fn head_var(mut self, name: impl Into<Arc<str>>) -> Self {
        self.head_terms.push(HeadTerm::Var(name.into()));
        self
    }

    pub fn head_lit(mut self, value: Boxed) -> Self {
        self.head_terms.push(HeadTerm::Lit(value));
        self
    }

    pub fn head_app(mut self, func: impl Into<Arc<str>>, args: Vec<impl Into<Arc<str>>>) -> Self {
        self.head_terms.push(HeadTerm::App(func.into(), args.into_iter().map(Into::into).collect()));
        self
    }

    pub fn atom(mut self, atom: AtomBuilder) -> Self {
        self.body.push(BodyLiteral::Atom(atom.build()));
        self
    }

    pub fn guard(mut self, func: impl Into<Arc<str>>, args: Vec<Term>) -> Self {
        self.body.push(BodyLiteral::Guard(Guard { func: func.into(), args }));
        self
    }

    pub fn functional(
        mut self,
        out_vars: Vec<impl Into<Arc<str>>>,
        func: impl Into<Arc<str>>,
        in_vars: Vec<impl Into<Arc<str>>>,
    ) -> Self {
        self.body.push(BodyLiteral::Functional(super::Functional {
            out_vars: out_vars.into_iter().map(Into::into).collect(),
            func: func.into(),
            in_vars: in_vars.into_iter().map(Into::into).collect(),
        }));
        self
    }

    pub fn build(self) -> Rule {
        Rule { head_sym: self.head_sym, head_terms: self.head_terms, body: self.body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_transitive_closure_rule() {
        let rule = RuleBuilder::new("path")
            .head_var("x")
            .head_var("z")
            .atom(AtomBuilder::new("path").var("x").var("y"))
            .atom(AtomBuilder::new("edge").var("y").var("z").edb())
            .build();
        assert_eq!(rule.body.len(), 2);
        assert!(rule.check_safe().is_ok());
    }
}
