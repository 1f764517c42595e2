//! Error Types
//!
//! Splits failures into two channels, per the solver's error handling design:
//!
//! - [`SolveError`]: reported back through the embedding layer. Malformed
//!   configuration, a stratification violation, or a caller asking for a
//!   feature combination the compiler rejects (functionals + provenance).
//! - [`bug!`]: an internal-bug channel for states that should be unreachable
//!   on well-formed input — a missing index, a cycle surviving topological
//!   sort, an empty Tarjan stack. These are not recoverable and abort with a
//!   location tag rather than threading a `Result` through every phase.

use thiserror::Error;

/// Errors reported back through the embedding layer.
#[derive(Error, Debug)]
pub enum SolveError {
    /// A negative-cycle was found while stratifying the dependency graph:
    /// some predicate negates a predicate that (transitively) depends on it.
    #[error("stratification error: negative dependency cycle through {0:?}")]
    Stratification(Vec<String>),

    /// A rule has an unbound variable in its head or in a negated/guard
    /// position at compile time.
    #[error("unsafe rule: variable {0:?} is not bound by any positive body atom")]
    UnsafeRule(String),

    /// A functional atom was present in a program submitted with provenance
    /// enabled. Functionals and provenance cannot be combined (§9).
    #[error("provenance is incompatible with functional atoms (relation {0:?})")]
    ProvenanceUnsupported(String),

    /// Provenance was requested for a program that was not compiled with
    /// provenance enabled.
    #[error("provenance was not requested for this solve; call solve_with_provenance")]
    ProvenanceNotRequested,

    /// A row passed to `inject_into_n` did not match the predicate's declared
    /// arity or a column's established type.
    #[error("injected tuple for {relation:?} has arity {got}, expected {expected}")]
    ArityMismatch {
        relation: String,
        expected: usize,
        got: usize,
    },

    /// Malformed configuration (surfaced from `figment`).
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
}

/// Result type used throughout the public solver API.
pub type SolveResult<T> = Result<T, SolveError>;

/// Panics with a uniform message identifying the invariant that broke and
/// where. Used only for states the spec calls "bugs": they indicate the
/// compiler emitted an ill-formed program, not something a caller can act on.
macro_rules! bug {
    ($($arg:tt)*) => {
        panic!("internal bug at {}:{}: {}", file!(), line!(), format!($($arg)*))
    };
}

pub(crate) use bug;
