//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (INPUTLAYER_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! enable_debugging = true
//! par_level = 4
//! disable_join_optimizer = false
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! INPUTLAYER_PAR_LEVEL=4
//! INPUTLAYER_USE_PROVENANCE=true
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Knobs the solver reads at every `solve`/`solve_with_provenance` call
/// (spec §6). None of these affect the *result* of a solve except
/// `disable_join_optimizer` and `use_provenance` — the rest tune debugging
/// output, concurrency, and the profiler's sampling behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Attaches a [`crate::FileDebugSink`] that dumps the RAM tree after
    /// every compiler phase to `debug_file_name`.
    #[serde(default)]
    pub enable_debugging: bool,

    /// Additionally dumps the solved model's facts through the debug sink.
    #[serde(default)]
    pub enable_debug_print_facts: bool,

    /// Destination file for [`crate::FileDebugSink`] dumps.
    #[serde(default = "default_debug_file_name")]
    pub debug_file_name: PathBuf,

    /// Skips profiling and Selinger-DP join reordering (spec §4.10);
    /// programs run in the join order the compiler emitted them in.
    #[serde(default)]
    pub disable_join_optimizer: bool,

    /// Requests depth/rule-number provenance columns on every `solve`
    /// call, not just `solve_with_provenance` (spec §4.11).
    #[serde(default)]
    pub use_provenance: bool,

    /// B+tree fan-out hint threaded to [`crate::ordered_index::OrderedIndex::new`].
    #[serde(default = "default_index_arity")]
    pub index_arity: usize,

    /// Nesting depth at which `ESearch`/`EPar` stop fanning out across
    /// `rayon` and fall back to sequential iteration (spec §5).
    #[serde(default = "default_par_level")]
    pub par_level: usize,

    /// Minimum EDB fact count below which profiling is skipped entirely
    /// and the compiled join order is used unreordered.
    #[serde(default = "default_profiler_fact_lower_bound")]
    pub profiler_fact_lower_bound: usize,

    /// Seed for the profiler's `StdRng`, so a given program/config pair
    /// samples deterministically.
    #[serde(default)]
    pub profiler_seed: u64,

    /// Floor on how many facts of each relation the sampler keeps, even
    /// when `profiler_discrimination` would otherwise drop more.
    #[serde(default = "default_profiler_minimum_facts")]
    pub profiler_minimum_facts: usize,

    /// Fraction of each relation's facts the Bernoulli sampler discards.
    #[serde(default = "default_profiler_discrimination")]
    pub profiler_discrimination: f64,
}

fn default_debug_file_name() -> PathBuf {
    PathBuf::from("inputlayer-debug.log")
}
fn default_index_arity() -> usize {
    64
}
fn default_par_level() -> usize {
    2
}
fn default_profiler_fact_lower_bound() -> usize {
    10
}
fn default_profiler_minimum_facts() -> usize {
    100
}
fn default_profiler_discrimination() -> f64 {
    0.20
}

impl Config {
    /// Loads configuration from default locations.
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (`INPUTLAYER_*` prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("INPUTLAYER_").split("__"))
            .join(figment::providers::Serialized::defaults(Config::default()))
            .extract()
    }

    /// Loads configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("INPUTLAYER_").split("__"))
            .join(figment::providers::Serialized::defaults(Config::default()))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enable_debugging: false,
            enable_debug_print_facts: false,
            debug_file_name: default_debug_file_name(),
            disable_join_optimizer: false,
            use_provenance: false,
            index_arity: default_index_arity(),
            par_level: default_par_level(),
            profiler_fact_lower_bound: default_profiler_fact_lower_bound(),
            profiler_seed: 0,
            profiler_minimum_facts: default_profiler_minimum_facts(),
            profiler_discrimination: default_profiler_discrimination(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert!(!config.enable_debugging);
        assert!(!config.disable_join_optimizer);
        assert_eq!(config.index_arity, 64);
        assert_eq!(config.par_level, 2);
        assert_eq!(config.profiler_fact_lower_bound, 10);
        assert_eq!(config.profiler_minimum_facts, 100);
        assert!((config.profiler_discrimination - 0.20).abs() < f64::EPSILON);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("par_level"));
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.par_level, config.par_level);
    }

    #[test]
    fn from_file_falls_back_to_defaults_when_file_is_missing() {
        let config = Config::from_file("does-not-exist.toml").unwrap();
        assert_eq!(config.par_level, default_par_level());
    }
}
