//! Study-level data model (spec §3 "Study").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Direction of optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Goal {
    Minimize,
    Maximize,
}

/// Upper bound on the number of trials a study will run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxTrials {
    Bounded(u64),
    Unbounded,
}

impl MaxTrials {
    pub fn is_reached(&self, completed: u64) -> bool {
        match self {
            MaxTrials::Bounded(n) => completed >= *n,
            MaxTrials::Unbounded => false,
        }
    }
}

/// Lifecycle state of a study. Status transitions are monotonic except
/// pause <-> running (spec §3); `Cancelled` is a terminal sink reached only
/// via an explicit cancel request (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudyStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl StudyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StudyStatus::Completed | StudyStatus::Failed | StudyStatus::Cancelled
        )
    }

    /// Whether transitioning from `self` to `next` is legal (spec §3: "status
    /// transitions monotonically except pause<->running").
    pub fn can_transition_to(&self, next: StudyStatus) -> bool {
        use StudyStatus::*;
        if *self == next {
            return true;
        }
        match (*self, next) {
            (_, _) if self.is_terminal() => false,
            (Pending, Running) => true,
            (Running, Paused) => true,
            (Paused, Running) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            (Paused, Cancelled) => true,
            (Pending, Cancelled) | (Pending, Failed) => true,
            _ => false,
        }
    }
}

/// Named, opaque configuration for a pluggable sampler or pruner: a string
/// identifier the coordinator dispatches on, plus a JSON options blob the
/// concrete implementation parses for itself. Keeps `hopt-types` free of a
/// dependency on `hopt-sampler`/`hopt-pruner`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub opts: serde_json::Value,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opts: serde_json::Value::Null,
        }
    }

    pub fn with_opts(mut self, opts: serde_json::Value) -> Self {
        self.opts = opts;
        self
    }
}

/// A named optimization run (spec §3 "Study").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub id: String,
    pub goal: Goal,
    pub max_trials: MaxTrials,
    pub parallelism: u32,
    pub seed: u64,
    pub status: StudyStatus,
    pub sampler: ComponentSpec,
    pub pruner: Option<ComponentSpec>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Study {
    pub fn new(id: impl Into<String>, goal: Goal, sampler: ComponentSpec) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            goal,
            max_trials: MaxTrials::Bounded(100),
            parallelism: 1,
            seed: 0,
            status: StudyStatus::Pending,
            sampler,
            pruner: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_max_trials(mut self, n: u64) -> Self {
        self.max_trials = MaxTrials::Bounded(n);
        self
    }

    pub fn with_parallelism(mut self, n: u32) -> Self {
        self.parallelism = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_pruner(mut self, pruner: ComponentSpec) -> Self {
        self.pruner = Some(pruner);
        self
    }

    /// Synchronous validation raised from `create_study` (spec §7
    /// "Validation" errors).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyStudyId);
        }
        if self.parallelism == 0 {
            return Err(ValidationError::ZeroParallelism(self.parallelism));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic_with_pause_exception() {
        assert!(StudyStatus::Pending.can_transition_to(StudyStatus::Running));
        assert!(StudyStatus::Running.can_transition_to(StudyStatus::Paused));
        assert!(StudyStatus::Paused.can_transition_to(StudyStatus::Running));
        assert!(StudyStatus::Running.can_transition_to(StudyStatus::Completed));
        assert!(!StudyStatus::Completed.can_transition_to(StudyStatus::Running));
        assert!(!StudyStatus::Failed.can_transition_to(StudyStatus::Completed));
    }

    #[test]
    fn max_trials_bounded_reports_reached() {
        assert!(MaxTrials::Bounded(10).is_reached(10));
        assert!(!MaxTrials::Bounded(10).is_reached(9));
        assert!(!MaxTrials::Unbounded.is_reached(u64::MAX));
    }

    #[test]
    fn validate_rejects_empty_id() {
        let study = Study::new("", Goal::Minimize, ComponentSpec::new("random"));
        assert_eq!(study.validate(), Err(ValidationError::EmptyStudyId));
    }

    #[test]
    fn validate_rejects_zero_parallelism() {
        let study = Study::new("s1", Goal::Minimize, ComponentSpec::new("random")).with_parallelism(0);
        assert!(matches!(
            study.validate(),
            Err(ValidationError::ZeroParallelism(0))
        ));
    }
}
