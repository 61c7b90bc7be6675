//! Shared request/filter types used by every store adapter.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use hopt_types::TrialStatus;

/// Filters accepted by `list_trials` (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct TrialFilter {
    pub statuses: Option<HashSet<TrialStatus>>,
    pub max_index: Option<u64>,
    pub bracket: Option<u64>,
}

impl TrialFilter {
    pub fn matches(&self, status: TrialStatus, index: u64, bracket: u64) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&status) {
                return false;
            }
        }
        if let Some(max_index) = self.max_index {
            if index > max_index {
                return false;
            }
        }
        if let Some(b) = self.bracket {
            if bracket != b {
                return false;
            }
        }
        true
    }
}

/// A partial update to a trial (spec §4.1 `update_trial`). `finished_at` is
/// stamped by the store, not supplied by the caller.
#[derive(Debug, Clone)]
pub struct TrialPatch {
    pub status: TrialStatus,
    pub score: Option<f64>,
    pub metrics: HashMap<String, f64>,
    pub error: Option<String>,
}

impl TrialPatch {
    pub fn succeeded(score: f64, metrics: HashMap<String, f64>) -> Self {
        Self {
            status: TrialStatus::Succeeded,
            score: Some(score),
            metrics,
            error: None,
        }
    }

    pub fn pruned(score: Option<f64>) -> Self {
        Self {
            status: TrialStatus::Pruned,
            score,
            metrics: HashMap::new(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TrialStatus::Failed,
            score: None,
            metrics: HashMap::new(),
            error: Some(error.into()),
        }
    }
}

/// Timestamp helper so adapters stamp `finished_at` consistently.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}
