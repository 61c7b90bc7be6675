//! The Study Coordinator (spec §4.5): drives a study from `pending` to a
//! terminal status, dispatching trials at bounded parallelism and folding
//! their outcomes back into the Sampler/Pruner/Store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hopt_pruner::{build_pruner, Pruner, PrunerOpts};
use hopt_sampler::{build_sampler, SamplerOpts};
use hopt_space::SearchSpace;
use hopt_store::{TrialFilter, TrialPatch, TrialStore};
use hopt_types::{
    derive_trial_seed, logic_error, Goal, HistorySnapshot, HoptError, HoptResult, MaxTrials,
    StoreError, Study, StudyStatus, TerminalTrial, Trial, TrialStatus,
};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::events::{Event, EventSink, NullSink};
use crate::report::{apply_report, Reporter, ScoreOutcome, Scorer};

/// How a `run` ended.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: StudyStatus,
    pub best: Option<Trial>,
    pub trials: Vec<Trial>,
}

/// Stateless orchestration entry point: owns a store and a sink, takes a
/// fresh `Study` per call (spec §9 "Global state": no process-wide
/// singletons — every study owns its coordinator run).
pub struct Coordinator {
    store: Arc<dyn TrialStore>,
    sink: Arc<dyn EventSink>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn TrialStore>) -> Self {
        Self {
            store,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Runs a study to completion (spec §4.5 steps 1-5).
    ///
    /// `cancel` is polled once per prospective new trial and is also wired
    /// into every in-flight `Reporter`, so flipping it both stops new
    /// dispatch and signals a prune to running trials on their next
    /// `report` (spec §5 "Cancellation").
    pub async fn run(
        &self,
        study: Study,
        space: SearchSpace,
        scorer: Arc<dyn Scorer>,
        cancel: Arc<AtomicBool>,
    ) -> HoptResult<RunOutcome> {
        study.validate()?;
        space.at(0).validate()?;

        self.store.put_study(study.clone()).await?;
        self.sink.emit(Event::study_created(study.id.clone()));

        self.store
            .set_study_status(&study.id, StudyStatus::Running)
            .await?;
        self.sink
            .emit(Event::status_changed(study.id.clone(), StudyStatus::Running));

        let sampler_opts = SamplerOpts::new(study.seed, study.goal).with_extra(study.sampler.opts.clone());
        let mut sampler = build_sampler(&study.sampler.name, sampler_opts)?;

        let pruner: Option<Arc<Mutex<Box<dyn Pruner>>>> = match &study.pruner {
            Some(spec) => {
                let opts = PrunerOpts::new(study.goal).with_extra(spec.opts.clone());
                Some(Arc::new(Mutex::new(build_pruner(&spec.name, opts)?)))
            }
            None => None,
        };

        let max_trials = match study.max_trials {
            MaxTrials::Bounded(n) => n,
            MaxTrials::Unbounded => u64::MAX,
        };
        let semaphore = Arc::new(Semaphore::new(study.parallelism.max(1) as usize));
        let mut joinset: JoinSet<()> = JoinSet::new();

        let mut ix = 0u64;
        while ix < max_trials {
            if cancel.load(Ordering::SeqCst) {
                tracing::info!(study_id = %study.id, "cancellation requested; stopping new-trial dispatch");
                break;
            }

            let current = self.store.get_study(&study.id).await?;
            if current.status == StudyStatus::Paused {
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
            if current.status.is_terminal() {
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| logic_error!("worker semaphore closed unexpectedly: {e}"))?;

            let seed = derive_trial_seed(study.seed, ix);
            let history = self.history_snapshot(&study.id).await?;
            let static_space = space.at(ix);
            let params = sampler.next(&static_space, ix, &history)?;
            self.sink
                .emit(Event::sampler_suggested(study.id.clone(), ix, sampler.name()));

            let bracket = match &pruner {
                Some(p) => p.lock().assign_bracket(ix),
                None => 0,
            };

            let trial = self.store.add_trial(&study.id, params.clone(), bracket, seed).await?;
            self.sink
                .emit(Event::trial_started(study.id.clone(), trial.id, ix));

            let reporter = Reporter {
                store: self.store.clone(),
                sink: self.sink.clone(),
                pruner: pruner.clone(),
                own_history: Vec::new(),
                study_id: study.id.clone(),
                trial_id: trial.id,
                bracket,
                goal: study.goal,
                cancelled: cancel.clone(),
            };

            let store = self.store.clone();
            let sink = self.sink.clone();
            let scorer = scorer.clone();
            let study_id = study.id.clone();
            let trial_id = trial.id;

            joinset.spawn(async move {
                let _permit = permit;
                let mut reporter = reporter;
                let outcome = scorer.score(&params, &mut reporter).await;
                let patch = outcome_to_patch(outcome);
                if let Err(e) = commit_terminal(&store, &study_id, trial_id, patch).await {
                    tracing::error!(
                        study_id = %study_id,
                        trial_id = %trial_id,
                        error = %e,
                        "failed to commit terminal trial status"
                    );
                    sink.emit(Event::error_occurred(study_id.clone(), e.to_string()));
                }
                sink.emit(Event::trial_completed(study_id, trial_id, ix));
            });

            ix += 1;
        }

        while joinset.join_next().await.is_some() {}

        let final_status = if cancel.load(Ordering::SeqCst) {
            StudyStatus::Cancelled
        } else {
            StudyStatus::Completed
        };
        self.store.set_study_status(&study.id, final_status).await?;
        self.sink
            .emit(Event::status_changed(study.id.clone(), final_status));
        self.sink.emit(Event::completed(study.id.clone()));

        let trials = self.store.list_trials(&study.id, TrialFilter::default()).await?;
        let best = best_trial(&trials, study.goal);

        Ok(RunOutcome {
            status: final_status,
            best,
            trials,
        })
    }

    async fn history_snapshot(&self, study_id: &str) -> HoptResult<HistorySnapshot> {
        let mut filter = TrialFilter::default();
        filter.statuses = Some(
            [TrialStatus::Succeeded, TrialStatus::Pruned, TrialStatus::Failed]
                .into_iter()
                .collect(),
        );
        let trials = self.store.list_trials(study_id, filter).await?;
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

pub(crate) fn outcome_to_patch(outcome: ScoreOutcome) -> TrialPatch {
    match outcome {
        ScoreOutcome::Succeeded { score, metrics } => match Trial::normalize_score(score) {
            Some(s) => TrialPatch::succeeded(s, metrics),
            None => TrialPatch::failed("scoring function returned NaN or infinite score"),
        },
        ScoreOutcome::Failed(message) => TrialPatch::failed(message),
    }
}

/// Commits a trial's terminal status, retrying transient store failures up
/// to 3 attempts with exponential backoff (spec §7 "Storage-transient").
/// A `TerminalTrialWrite` rejection means the trial was already pruned by
/// its own `report` race and is treated as success (spec §4.5 step g
/// "prune signal -> already terminal, do nothing further").
pub(crate) async fn commit_terminal(
    store: &Arc<dyn TrialStore>,
    study_id: &str,
    trial_id: hopt_types::TrialId,
    patch: TrialPatch,
) -> HoptResult<()> {
    let max_attempts = 3u32;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match store.update_trial(study_id, trial_id, patch.clone()).await {
            Ok(()) => return Ok(()),
            Err(HoptError::Store(StoreError::TerminalTrialWrite { .. })) => return Ok(()),
            Err(HoptError::Store(StoreError::Transient { .. })) if attempt < max_attempts => {
                let backoff = Duration::from_millis(50 * 2u64.pow(attempt - 1));
                tracing::warn!(study_id = %study_id, trial_id = %trial_id, attempt, "transient store failure, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

pub(crate) fn best_trial(trials: &[Trial], goal: Goal) -> Option<Trial> {
    trials
        .iter()
        .filter(|t| t.status == TrialStatus::Succeeded && t.score.is_some())
        .min_by(|a, b| {
            let sa = a.score.unwrap();
            let sb = b.score.unwrap();
            match goal {
                Goal::Minimize => sa.partial_cmp(&sb).unwrap(),
                Goal::Maximize => sb.partial_cmp(&sa).unwrap(),
            }
        })
        .cloned()
}
