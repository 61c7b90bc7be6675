//! The Trial Store contract (spec §4.1): adapter-polymorphic persistence
//! for studies, trials, and intermediate observations.

use async_trait::async_trait;
use hopt_types::{HoptResult, ParamMap, Study, StudyStatus, Trial, TrialId};

use crate::types::{TrialFilter, TrialPatch};

/// Implemented by every persistence backend (in-memory, SQL, ...). All
/// operations either succeed or return a typed `HoptError` (spec §4.1
/// "Failure semantics"); the coordinator is the only writer, samplers and
/// pruners only ever read through `list_trials`/`observations_at_rung`.
#[async_trait]
pub trait TrialStore: Send + Sync {
    /// Idempotent on identical content; `already_exists` if a *different*
    /// study is already registered under `study.id`.
    async fn put_study(&self, study: Study) -> HoptResult<()>;

    async fn get_study(&self, id: &str) -> HoptResult<Study>;

    /// Rejects illegal transitions (spec §3: monotonic except pause<->running).
    async fn set_study_status(&self, id: &str, status: StudyStatus) -> HoptResult<()>;

    /// Assigns `index = (current count)` atomically and returns the new
    /// trial with its dense index and generated id populated.
    async fn add_trial(
        &self,
        study_id: &str,
        params: ParamMap,
        bracket: u64,
        seed: u64,
    ) -> HoptResult<Trial>;

    /// Rejects writes to already-terminal trials (spec §3 "write-once").
    async fn update_trial(&self, study_id: &str, trial_id: TrialId, patch: TrialPatch) -> HoptResult<()>;

    /// Overwrites silently if an observation already exists at
    /// `(trial_id, rung)` (spec §3 Observation invariant).
    async fn record_observation(
        &self,
        study_id: &str,
        trial_id: TrialId,
        bracket: u64,
        rung: u64,
        value: f64,
    ) -> HoptResult<()>;

    /// Ordered by `index` ascending.
    async fn list_trials(&self, study_id: &str, filter: TrialFilter) -> HoptResult<Vec<Trial>>;

    async fn fetch_trial(&self, study_id: &str, trial_id: TrialId) -> HoptResult<Trial>;

    async fn observations_at_rung(
        &self,
        study_id: &str,
        bracket: u64,
        rung: u64,
    ) -> HoptResult<Vec<(TrialId, f64)>>;

    /// Cascades to the study's trials and observations.
    async fn delete_study(&self, id: &str) -> HoptResult<()>;
}
