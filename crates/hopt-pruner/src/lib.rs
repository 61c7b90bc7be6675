//! Pruner family (spec §4.4): early-stopping policies consulted on every
//! intermediate `report` callback (spec §4.5 step f). A pruner's decisions
//! must be deterministic given identical inputs (spec §4.4 "All pruners must
//! produce deterministic decisions given identical inputs").

pub mod adaptive;
pub mod hyperband;
pub mod median;
pub mod sha;

use hopt_types::{Goal, HoptResult, TrialId, ValidationError};
use serde_json::Value;

/// Options passed to every pruner at construction (spec §4.4 `init(opts)`).
#[derive(Debug, Clone)]
pub struct PrunerOpts {
    pub goal: Goal,
    pub extra: Value,
}

impl PrunerOpts {
    pub fn new(goal: Goal) -> Self {
        Self {
            goal,
            extra: Value::Null,
        }
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }

    pub fn u64_opt(&self, key: &str, default: u64) -> u64 {
        self.extra.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    pub fn f64_opt(&self, key: &str, default: f64) -> f64 {
        self.extra.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn f64_array_opt(&self, key: &str) -> Vec<f64> {
        self.extra
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default()
    }
}

/// Per-study context a pruner needs to interpret a `keep?` decision (spec
/// §4.4 `context = {study_id, goal, bracket}`).
#[derive(Debug, Clone)]
pub struct PrunerContext {
    pub study_id: String,
    pub goal: Goal,
    pub bracket: u64,
}

/// Everything a pruner needs for one `keep?` decision. `peers_at_rung` is
/// the Trial Store's `observations_at_rung` result for this trial's
/// `(bracket, rung)`, excluding the trial itself.
pub struct PrunerInput<'a> {
    pub trial_id: TrialId,
    pub rung: u64,
    pub latest_value: f64,
    pub own_history: &'a [f64],
    pub peers_at_rung: &'a [(TrialId, f64)],
    pub context: &'a PrunerContext,
}

/// Shared contract for every pruner (spec §4.4).
pub trait Pruner: Send {
    /// Default 0 for non-bandit pruners (spec §4.4).
    fn assign_bracket(&mut self, trial_index: u64) -> u64 {
        let _ = trial_index;
        0
    }

    /// Returns `false` to prune, `true` to continue (spec §4.4).
    fn keep(&mut self, input: PrunerInput) -> bool;

    fn name(&self) -> &'static str;
}

pub fn build_pruner(name: &str, opts: PrunerOpts) -> HoptResult<Box<dyn Pruner>> {
    let pruner: Box<dyn Pruner> = match name {
        "median" => Box::new(median::MedianPruner::new(opts, 50.0)),
        "percentile" => {
            let p = opts.f64_opt("percentile", 50.0);
            Box::new(median::MedianPruner::new(opts, p))
        }
        "sha" | "successive_halving" => Box::new(sha::ShaPruner::new(opts)),
        "hyperband" => Box::new(hyperband::HyperbandPruner::new(opts)),
        "patient" => Box::new(adaptive::PatientPruner::new(opts)),
        "threshold" => Box::new(adaptive::ThresholdPruner::new(opts)),
        "wilcoxon" => Box::new(adaptive::WilcoxonPruner::new(opts)),
        other => return Err(ValidationError::UnknownPruner(other.to_string()).into()),
    };
    Ok(pruner)
}
