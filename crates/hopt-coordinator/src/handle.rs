//! Manual-mode facade (spec §6.1): `suggest`/`complete` expose the same
//! Sampler/Pruner/Store plumbing `Coordinator::run` uses, for callers that
//! want to drive trial execution themselves (e.g. an external job queue).

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use hopt_pruner::{build_pruner, Pruner, PrunerOpts};
use hopt_sampler::{build_sampler, Sampler, SamplerOpts};
use hopt_space::SearchSpace;
use hopt_store::{TrialFilter, TrialStore};
use hopt_types::{
    derive_trial_seed, Goal, HistorySnapshot, HoptResult, ParamMap, Study, StudyStatus,
    TerminalTrial, Trial, TrialId, TrialStatus,
};
use parking_lot::Mutex;

use crate::coordinator::{best_trial, commit_terminal, outcome_to_patch};
use crate::events::{Event, EventSink, NullSink};
use crate::report::{apply_report, ReportSignal, ScoreOutcome};

/// A study under manual dispatch: the caller calls `suggest` to get the
/// next trial's parameters, runs the scoring function itself (wherever it
/// likes), and calls `complete`/`report` to feed results back.
pub struct StudyHandle {
    study: Study,
    space: SearchSpace,
    store: Arc<dyn TrialStore>,
    sink: Arc<dyn EventSink>,
    sampler: Mutex<Box<dyn Sampler>>,
    pruner: Option<Arc<Mutex<Box<dyn Pruner>>>>,
    next_index: Mutex<u64>,
    trial_histories: Mutex<HashMap<TrialId, Vec<f64>>>,
    trial_brackets: Mutex<HashMap<TrialId, u64>>,
    trial_indices: Mutex<HashMap<TrialId, u64>>,
    cancelled: Arc<AtomicBool>,
}

impl StudyHandle {
    /// `create_study` (spec §6.1): persists the study, sets it running, and
    /// instantiates its sampler/pruner.
    pub async fn create(
        store: Arc<dyn TrialStore>,
        sink: Arc<dyn EventSink>,
        study: Study,
        space: SearchSpace,
    ) -> HoptResult<Self> {
        study.validate()?;
        space.at(0).validate()?;
        store.put_study(study.clone()).await?;
        sink.emit(Event::study_created(study.id.clone()));
        store.set_study_status(&study.id, StudyStatus::Running).await?;
        sink.emit(Event::status_changed(study.id.clone(), StudyStatus::Running));

        let sampler_opts = SamplerOpts::new(study.seed, study.goal).with_extra(study.sampler.opts.clone());
        let sampler = build_sampler(&study.sampler.name, sampler_opts)?;

        let pruner = match &study.pruner {
            Some(spec) => {
                let opts = PrunerOpts::new(study.goal).with_extra(spec.opts.clone());
                Some(Arc::new(Mutex::new(build_pruner(&spec.name, opts)?)))
            }
            None => None,
        };

        Ok(Self {
            study,
            space,
            store,
            sink,
            sampler: Mutex::new(sampler),
            pruner,
            next_index: Mutex::new(0),
            trial_histories: Mutex::new(HashMap::new()),
            trial_brackets: Mutex::new(HashMap::new()),
            trial_indices: Mutex::new(HashMap::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// `suggest(study_handle) -> (trial_handle, params)` (spec §6.1).
    pub async fn suggest(&self) -> HoptResult<(Trial, ParamMap)> {
        let ix = {
            let mut guard = self.next_index.lock();
            let ix = *guard;
            *guard += 1;
            ix
        };

        let history = self.history_snapshot().await?;
        let static_space = self.space.at(ix);
        let seed = derive_trial_seed(self.study.seed, ix);
        let params = {
            let mut s = self.sampler.lock();
            s.next(&static_space, ix, &history)?
        };
        self.sink.emit(Event::sampler_suggested(
            self.study.id.clone(),
            ix,
            self.sampler.lock().name(),
        ));

        let bracket = match &self.pruner {
            Some(p) => p.lock().assign_bracket(ix),
            None => 0,
        };

        let trial = self
            .store
            .add_trial(&self.study.id, params.clone(), bracket, seed)
            .await?;
        self.trial_brackets.lock().insert(trial.id, bracket);
        self.trial_indices.lock().insert(trial.id, ix);
        self.sink
            .emit(Event::trial_started(self.study.id.clone(), trial.id, ix));

        Ok((trial, params))
    }

    /// `complete(trial_handle, score | {ok, score, metrics})` (spec §6.1).
    pub async fn complete(&self, trial_id: TrialId, outcome: ScoreOutcome) -> HoptResult<()> {
        let index = self.trial_indices.lock().remove(&trial_id).unwrap_or(0);
        let patch = outcome_to_patch(outcome);
        commit_terminal(&self.store, &self.study.id, trial_id, patch).await?;
        self.trial_histories.lock().remove(&trial_id);
        self.trial_brackets.lock().remove(&trial_id);
        self.sink
            .emit(Event::trial_completed(self.study.id.clone(), trial_id, index));
        Ok(())
    }

    /// Manual-mode equivalent of the `report` callback (spec §6.2): records
    /// an intermediate observation and consults the pruner.
    pub async fn report(&self, trial_id: TrialId, rung: u64, value: f64) -> HoptResult<ReportSignal> {
        let bracket = *self.trial_brackets.lock().get(&trial_id).unwrap_or(&0);
        let mut history = {
            let mut guard = self.trial_histories.lock();
            guard.remove(&trial_id).unwrap_or_default()
        };

        let signal = apply_report(
            &self.store,
            &self.sink,
            self.pruner.as_ref(),
            &mut history,
            &self.study.id,
            trial_id,
            bracket,
            self.study.goal,
            &self.cancelled,
            rung,
            value,
        )
        .await?;

        self.trial_histories.lock().insert(trial_id, history);
        Ok(signal)
    }

    pub async fn list_trials(&self, filter: TrialFilter) -> HoptResult<Vec<Trial>> {
        self.store.list_trials(&self.study.id, filter).await
    }

    pub async fn best_trial(&self) -> HoptResult<Option<Trial>> {
        let trials = self.store.list_trials(&self.study.id, TrialFilter::default()).await?;
        Ok(best_trial(&trials, self.study.goal))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn study_id(&self) -> &str {
        &self.study.id
    }

    pub fn goal(&self) -> Goal {
        self.study.goal
    }

    async fn history_snapshot(&self) -> HoptResult<HistorySnapshot> {
        let mut filter = TrialFilter::default();
        filter.statuses = Some(
            [TrialStatus::Succeeded, TrialStatus::Pruned, TrialStatus::Failed]
                .into_iter()
                .collect(),
        );
        let trials = self.store.list_trials(&self.study.id, filter).await?;
        let trials = trials
            .into_iter()
            .map(|t| TerminalTrial {
                index: t.index,
                params: t.params,
                score: t.score,
                status: t.status,
                bracket: t.bracket,
            })
            .collect();
        Ok(HistorySnapshot { trials })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_space::{ParamSpec, StaticSpace};
    use hopt_store::InMemoryStore;
    use hopt_types::{ComponentSpec, ParamValue};

    fn space() -> SearchSpace {
        SearchSpace::static_space(StaticSpace::new().push("x", ParamSpec::Uniform { lo: 0.0, hi: 1.0 }))
    }

    #[tokio::test]
    async fn suggest_then_complete_round_trips() {
        let store: Arc<dyn TrialStore> = Arc::new(InMemoryStore::new());
        let study = Study::new("manual-1", Goal::Minimize, ComponentSpec::new("random")).with_seed(5);
        let handle = StudyHandle::create(store, Arc::new(NullSink), study, space())
            .await
            .unwrap();

        let (trial, params) = handle.suggest().await.unwrap();
        assert!(params.contains_key("x"));

        let x = params.get("x").and_then(ParamValue::as_f64).unwrap();
        handle
            .complete(trial.id, ScoreOutcome::succeeded(x * x))
            .await
            .unwrap();

        let best = handle.best_trial().await.unwrap().expect("a succeeded trial");
        assert_eq!(best.id, trial.id);
    }

    #[tokio::test]
    async fn manual_report_consults_pruner() {
        let store: Arc<dyn TrialStore> = Arc::new(InMemoryStore::new());
        let study = Study::new("manual-2", Goal::Minimize, ComponentSpec::new("random"))
            .with_seed(5)
            .with_pruner(ComponentSpec::new("median").with_opts(serde_json::json!({
                "n_startup_trials": 0,
                "n_warmup_trials": 0
            })));
        let handle = StudyHandle::create(store, Arc::new(NullSink), study, space())
            .await
            .unwrap();

        let (trial_a, _) = handle.suggest().await.unwrap();
        let signal = handle.report(trial_a.id, 0, 0.1).await.unwrap();
        assert_eq!(signal, ReportSignal::Continue);
    }

    #[tokio::test]
    async fn suggest_assigns_monotonically_increasing_indices() {
        let store: Arc<dyn TrialStore> = Arc::new(InMemoryStore::new());
        let study = Study::new("manual-3", Goal::Minimize, ComponentSpec::new("random")).with_seed(1);
        let handle = StudyHandle::create(store, Arc::new(NullSink), study, space())
            .await
            .unwrap();

        let (t0, _) = handle.suggest().await.unwrap();
        let (t1, _) = handle.suggest().await.unwrap();
        assert_eq!(t0.index, 0);
        assert_eq!(t1.index, 1);
    }
}
