//! Trial and Observation data model (spec §3 "Trial", "Observation",
//! "History snapshot").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque trial identifier.
pub type TrialId = Uuid;

/// A concrete parameter value produced by sampling a distribution (spec
/// §4.2). Mirrors the teacher's `gb_optimizer::search::ParameterValue`
/// three-way split between float, integer, and opaque-JSON categorical
/// values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Categorical(serde_json::Value),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Categorical(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Categorical(v) => write!(f, "{v}"),
        }
    }
}

/// A parameter assignment: one value per search-space key.
pub type ParamMap = HashMap<String, ParamValue>;

/// Terminal states are write-once (spec §3: "terminal states ... are
/// write-once"); `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Running,
    Succeeded,
    Pruned,
    Failed,
}

impl TrialStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrialStatus::Running)
    }

    /// Invariant (spec §3): `score` is real iff status in {succeeded, pruned}.
    pub fn carries_score(&self) -> bool {
        matches!(self, TrialStatus::Succeeded | TrialStatus::Pruned)
    }
}

/// One evaluation of the scoring function (spec §3 "Trial").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub id: TrialId,
    pub study_id: String,
    pub index: u64,
    pub params: ParamMap,
    pub bracket: u64,
    pub rung: u64,
    pub status: TrialStatus,
    pub score: Option<f64>,
    pub metrics: HashMap<String, f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub seed: u64,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(study_id: impl Into<String>, index: u64, params: ParamMap, seed: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            study_id: study_id.into(),
            index,
            params,
            bracket: 0,
            rung: 0,
            status: TrialStatus::Running,
            score: None,
            metrics: HashMap::new(),
            started_at: Utc::now(),
            finished_at: None,
            seed,
            error: None,
        }
    }

    /// Normalize a raw scoring-function output: NaN/infinite scores are
    /// coerced to missing (spec §3 invariant, spec §7 "Numeric" errors).
    pub fn normalize_score(raw: f64) -> Option<f64> {
        if raw.is_finite() {
            Some(raw)
        } else {
            None
        }
    }

    pub fn mark_succeeded(&mut self, score: f64, metrics: HashMap<String, f64>) {
        self.status = TrialStatus::Succeeded;
        self.score = Self::normalize_score(score);
        self.metrics = metrics;
        self.finished_at = Some(Utc::now());
        if self.score.is_none() {
            // A NaN/inf result is not a successful score (spec §7: "NaN/inf
            // scores are coerced to failed").
            self.status = TrialStatus::Failed;
            self.error = Some("scoring function returned NaN or infinite score".to_string());
        }
    }

    pub fn mark_pruned(&mut self, latest_score: Option<f64>) {
        self.status = TrialStatus::Pruned;
        self.score = latest_score.and_then(Self::normalize_score);
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TrialStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }
}

/// An intermediate checkpoint emitted by a trial's scoring function (spec
/// §3 "Observation"). At most one observation exists per `(trial_id, rung)`;
/// the store silently overwrites on a repeat (spec §4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub study_id: String,
    pub trial_id: TrialId,
    pub bracket: u64,
    pub rung: u64,
    pub value: f64,
}

/// One terminal trial's contribution to sampler input (spec §3 "History
/// snapshot"). Samplers see only terminal trials, ordered by `index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalTrial {
    pub index: u64,
    pub params: ParamMap,
    pub score: Option<f64>,
    pub status: TrialStatus,
    pub bracket: u64,
}

/// Ordered sequence of terminal trials, the sampler's sole input besides
/// its own threaded state (spec §3, §4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub trials: Vec<TerminalTrial>,
}

impl HistorySnapshot {
    pub fn succeeded(&self) -> impl Iterator<Item = &TerminalTrial> {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Succeeded && t.score.is_some())
    }

    pub fn len_succeeded(&self) -> usize {
        self.succeeded().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_score_normalizes_to_missing() {
        assert_eq!(Trial::normalize_score(f64::NAN), None);
        assert_eq!(Trial::normalize_score(f64::INFINITY), None);
        assert_eq!(Trial::normalize_score(1.5), Some(1.5));
    }

    #[test]
    fn mark_succeeded_with_nan_becomes_failed() {
        let mut trial = Trial::new("s1", 0, ParamMap::new(), 1);
        trial.mark_succeeded(f64::NAN, HashMap::new());
        assert_eq!(trial.status, TrialStatus::Failed);
        assert!(trial.error.is_some());
    }

    #[test]
    fn mark_succeeded_sets_score_and_terminal() {
        let mut trial = Trial::new("s1", 0, ParamMap::new(), 1);
        trial.mark_succeeded(0.42, HashMap::new());
        assert_eq!(trial.status, TrialStatus::Succeeded);
        assert_eq!(trial.score, Some(0.42));
        assert!(trial.status.is_terminal());
        assert!(trial.finished_at.is_some());
    }

    #[test]
    fn history_filters_to_succeeded_with_score() {
        let mut history = HistorySnapshot::default();
        history.trials.push(TerminalTrial {
            index: 0,
            params: ParamMap::new(),
            score: Some(1.0),
            status: TrialStatus::Succeeded,
            bracket: 0,
        });
        history.trials.push(TerminalTrial {
            index: 1,
            params: ParamMap::new(),
            score: None,
            status: TrialStatus::Failed,
            bracket: 0,
        });
        assert_eq!(history.len_succeeded(), 1);
    }
}
