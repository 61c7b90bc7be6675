//! Observability event matrix (spec §6.4): a fixed set of lifecycle events
//! the coordinator emits into a pluggable sink. Transport is not part of the
//! core — a CLI or dashboard collaborator drains a `ChannelSink` elsewhere.

use chrono::{DateTime, Utc};
use hopt_types::{StudyStatus, TrialId};
use tokio::sync::mpsc::UnboundedSender;

/// One observability event. Every variant carries `study_id` and `at`
/// (spec §6.4: "each event specifies ... at minimum `study_id` and a
/// monotonic timestamp").
#[derive(Debug, Clone)]
pub enum Event {
    StudyCreated {
        study_id: String,
        at: DateTime<Utc>,
    },
    StatusChanged {
        study_id: String,
        status: StudyStatus,
        at: DateTime<Utc>,
    },
    Completed {
        study_id: String,
        at: DateTime<Utc>,
    },
    TrialStarted {
        study_id: String,
        trial_id: TrialId,
        index: u64,
        at: DateTime<Utc>,
    },
    TrialCompleted {
        study_id: String,
        trial_id: TrialId,
        index: u64,
        at: DateTime<Utc>,
    },
    TrialPruned {
        study_id: String,
        trial_id: TrialId,
        rung: u64,
        at: DateTime<Utc>,
    },
    SamplerSuggested {
        study_id: String,
        index: u64,
        sampler: &'static str,
        at: DateTime<Utc>,
    },
    PrunerDecision {
        study_id: String,
        trial_id: TrialId,
        rung: u64,
        kept: bool,
        at: DateTime<Utc>,
    },
    StoreOperation {
        study_id: String,
        operation: &'static str,
        at: DateTime<Utc>,
    },
    ErrorOccurred {
        study_id: String,
        message: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn study_created(study_id: impl Into<String>) -> Self {
        Event::StudyCreated {
            study_id: study_id.into(),
            at: Utc::now(),
        }
    }

    pub fn status_changed(study_id: impl Into<String>, status: StudyStatus) -> Self {
        Event::StatusChanged {
            study_id: study_id.into(),
            status,
            at: Utc::now(),
        }
    }

    pub fn completed(study_id: impl Into<String>) -> Self {
        Event::Completed {
            study_id: study_id.into(),
            at: Utc::now(),
        }
    }

    pub fn trial_started(study_id: impl Into<String>, trial_id: TrialId, index: u64) -> Self {
        Event::TrialStarted {
            study_id: study_id.into(),
            trial_id,
            index,
            at: Utc::now(),
        }
    }

    pub fn trial_completed(study_id: impl Into<String>, trial_id: TrialId, index: u64) -> Self {
        Event::TrialCompleted {
            study_id: study_id.into(),
            trial_id,
            index,
            at: Utc::now(),
        }
    }

    pub fn trial_pruned(study_id: impl Into<String>, trial_id: TrialId, rung: u64) -> Self {
        Event::TrialPruned {
            study_id: study_id.into(),
            trial_id,
            rung,
            at: Utc::now(),
        }
    }

    pub fn sampler_suggested(study_id: impl Into<String>, index: u64, sampler: &'static str) -> Self {
        Event::SamplerSuggested {
            study_id: study_id.into(),
            index,
            sampler,
            at: Utc::now(),
        }
    }

    pub fn pruner_decision(study_id: impl Into<String>, trial_id: TrialId, rung: u64, kept: bool) -> Self {
        Event::PrunerDecision {
            study_id: study_id.into(),
            trial_id,
            rung,
            kept,
            at: Utc::now(),
        }
    }

    pub fn store_operation(study_id: impl Into<String>, operation: &'static str) -> Self {
        Event::StoreOperation {
            study_id: study_id.into(),
            operation,
            at: Utc::now(),
        }
    }

    pub fn error_occurred(study_id: impl Into<String>, message: impl Into<String>) -> Self {
        Event::ErrorOccurred {
            study_id: study_id.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn study_id(&self) -> &str {
        match self {
            Event::StudyCreated { study_id, .. }
            | Event::StatusChanged { study_id, .. }
            | Event::Completed { study_id, .. }
            | Event::TrialStarted { study_id, .. }
            | Event::TrialCompleted { study_id, .. }
            | Event::TrialPruned { study_id, .. }
            | Event::SamplerSuggested { study_id, .. }
            | Event::PrunerDecision { study_id, .. }
            | Event::StoreOperation { study_id, .. }
            | Event::ErrorOccurred { study_id, .. } => study_id,
        }
    }
}

/// Emitted into by the coordinator; a CLI/dashboard consumer (out of scope,
/// spec §1) owns the transport on the other side.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Default sink: discards everything. Studies run identically whether or
/// not anyone is listening.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Feeds an unbounded channel a consumer task can drain; never blocks the
/// coordinator on a slow or absent reader.
pub struct ChannelSink {
    tx: UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<Event>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: Event) {
        // A closed receiver means nobody is listening anymore; dropping the
        // event is the correct behavior, not a coordinator-level error.
        let _ = self.tx.send(event);
    }
}
