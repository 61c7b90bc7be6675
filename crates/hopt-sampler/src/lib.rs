//! Sampler family (spec §4.3): adaptive search-distribution models that
//! propose the next parameter assignment from a study's terminal history.
//!
//! All samplers are threaded as owned, per-study objects mutated only by
//! the coordinator (spec §9 "Global state": no process-wide singletons).
//! The trait takes `&mut self` rather than the spec's functional
//! `(params, state')` pair — idiomatic Rust for single-owner state that the
//! coordinator already serializes per study (spec §4.5 "sampler `next`
//! calls are serialized").

pub mod cmaes;
pub mod grid;
pub mod nsga2;
pub mod qmc;
pub mod random;
pub mod tpe;

use hopt_space::StaticSpace;
use hopt_types::{Goal, HistorySnapshot, HoptResult, ParamMap, ValidationError};
use serde_json::Value;

/// Options passed to every sampler at construction (spec §4.3 `init(opts)`).
/// `extra` carries sampler-specific knobs (e.g. TPE's `min_obs`, CMA-ES's
/// `population_size`) as an opaque JSON blob the concrete sampler parses.
#[derive(Debug, Clone)]
pub struct SamplerOpts {
    pub seed: u64,
    pub goal: Goal,
    pub extra: Value,
}

impl SamplerOpts {
    pub fn new(seed: u64, goal: Goal) -> Self {
        Self {
            seed,
            goal,
            extra: Value::Null,
        }
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }

    /// Reads `self.extra[key]` as a u64, falling back to `default`.
    pub fn u64_opt(&self, key: &str, default: u64) -> u64 {
        self.extra
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(default)
    }

    pub fn f64_opt(&self, key: &str, default: f64) -> f64 {
        self.extra
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }

    pub fn bool_opt(&self, key: &str, default: bool) -> bool {
        self.extra
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }
}

/// Shared contract for every sampler (spec §4.3).
pub trait Sampler: Send {
    /// Proposes parameters for `trial_index`, satisfying `space` (spec §4.3
    /// "must return parameters satisfying `space_fn(trial_index)`").
    /// Total for any `history`, including empty (spec §4.3).
    fn next(
        &mut self,
        space: &StaticSpace,
        trial_index: u64,
        history: &HistorySnapshot,
    ) -> HoptResult<ParamMap>;

    fn name(&self) -> &'static str;
}

/// Dispatches a registered sampler by name (spec §9 "trait objects ... for
/// dynamic selection at study creation").
pub fn build_sampler(name: &str, opts: SamplerOpts) -> HoptResult<Box<dyn Sampler>> {
    let sampler: Box<dyn Sampler> = match name {
        "random" => Box::new(random::RandomSampler::new(opts)),
        "grid" => Box::new(grid::GridSampler::new(opts)),
        "tpe" => Box::new(tpe::TpeSampler::new(opts)),
        "cmaes" => Box::new(cmaes::CmaEsSampler::new(opts)),
        "nsga2" => Box::new(nsga2::Nsga2Sampler::new(opts)),
        "qmc" => Box::new(qmc::QmcSampler::new(opts)),
        other => return Err(ValidationError::UnknownSampler(other.to_string()).into()),
    };
    Ok(sampler)
}
