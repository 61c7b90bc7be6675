//! In-memory Trial Store adapter (spec §4.1): a process-local table with
//! a per-study write lock guarding index allocation and status
//! transitions; readers take only a read lock, so concurrent `list_trials`
//! calls never block each other. Not durable — mirrors the teacher's
//! `gb_data::cache::CacheManager` (a `DashMap<Key, RwLock<Entry>>`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use hopt_types::{
    HoptError, HoptResult, ParamMap, Study, StoreError, StudyStatus, Trial, TrialId, TrialStatus,
};
use parking_lot::RwLock;

use crate::traits::TrialStore;
use crate::types::{now, TrialFilter, TrialPatch};

struct StudyRecord {
    study: RwLock<Study>,
    trials: RwLock<Vec<Trial>>,
    observations: RwLock<HashMap<(TrialId, u64), (u64, f64)>>,
}

/// In-memory, process-local implementation of [`TrialStore`].
#[derive(Default)]
pub struct InMemoryStore {
    studies: DashMap<String, Arc<StudyRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            studies: DashMap::new(),
        }
    }

    fn record(&self, study_id: &str) -> HoptResult<Arc<StudyRecord>> {
        self.studies
            .get(study_id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::StudyNotFound(study_id.to_string()).into())
    }
}

#[async_trait]
impl TrialStore for InMemoryStore {
    async fn put_study(&self, study: Study) -> HoptResult<()> {
        if let Some(existing) = self.studies.get(&study.id) {
            let existing = existing.study.read();
            let same = existing.goal == study.goal
                && existing.max_trials == study.max_trials
                && existing.parallelism == study.parallelism
                && existing.seed == study.seed
                && existing.sampler == study.sampler
                && existing.pruner == study.pruner;
            return if same {
                Ok(())
            } else {
                Err(StoreError::StudyAlreadyExists(study.id.clone()).into())
            };
        }
        let id = study.id.clone();
        self.studies.insert(
            id,
            Arc::new(StudyRecord {
                study: RwLock::new(study),
                trials: RwLock::new(Vec::new()),
                observations: RwLock::new(HashMap::new()),
            }),
        );
        Ok(())
    }

    async fn get_study(&self, id: &str) -> HoptResult<Study> {
        Ok(self.record(id)?.study.read().clone())
    }

    async fn set_study_status(&self, id: &str, status: StudyStatus) -> HoptResult<()> {
        let record = self.record(id)?;
        let mut study = record.study.write();
        if !study.status.can_transition_to(status) {
            return Err(HoptError::Store(StoreError::IllegalStudyTransition {
                from: format!("{:?}", study.status),
                to: format!("{:?}", status),
            }));
        }
        study.status = status;
        study.updated_at = now();
        Ok(())
    }

    async fn add_trial(
        &self,
        study_id: &str,
        params: ParamMap,
        bracket: u64,
        seed: u64,
    ) -> HoptResult<Trial> {
        let record = self.record(study_id)?;
        let mut trials = record.trials.write();
        let index = trials.len() as u64;
        let mut trial = Trial::new(study_id, index, params, seed);
        trial.bracket = bracket;
        trials.push(trial.clone());
        Ok(trial)
    }

    async fn update_trial(&self, study_id: &str, trial_id: TrialId, patch: TrialPatch) -> HoptResult<()> {
        let record = self.record(study_id)?;
        let mut trials = record.trials.write();
        let trial = trials
            .iter_mut()
            .find(|t| t.id == trial_id)
            .ok_or_else(|| StoreError::TrialNotFound {
                study_id: study_id.to_string(),
                trial_id: trial_id.to_string(),
            })?;
        if trial.status.is_terminal() {
            return Err(HoptError::Store(StoreError::TerminalTrialWrite {
                trial_id: trial_id.to_string(),
                status: format!("{:?}", trial.status),
            }));
        }
        trial.status = patch.status;
        trial.score = if patch.status.carries_score() {
            patch.score
        } else {
            None
        };
        trial.metrics = patch.metrics;
        trial.error = patch.error;
        trial.finished_at = Some(now());
        Ok(())
    }

    async fn record_observation(
        &self,
        study_id: &str,
        trial_id: TrialId,
        bracket: u64,
        rung: u64,
        value: f64,
    ) -> HoptResult<()> {
        let record = self.record(study_id)?;
        record
            .observations
            .write()
            .insert((trial_id, rung), (bracket, value));
        Ok(())
    }

    async fn list_trials(&self, study_id: &str, filter: TrialFilter) -> HoptResult<Vec<Trial>> {
        let record = self.record(study_id)?;
        let trials = record.trials.read();
        Ok(trials
            .iter()
            .filter(|t| filter.matches(t.status, t.index, t.bracket))
            .cloned()
            .collect())
    }

    async fn fetch_trial(&self, study_id: &str, trial_id: TrialId) -> HoptResult<Trial> {
        let record = self.record(study_id)?;
        let trials = record.trials.read();
        trials
            .iter()
            .find(|t| t.id == trial_id)
            .cloned()
            .ok_or_else(|| {
                HoptError::Store(StoreError::TrialNotFound {
                    study_id: study_id.to_string(),
                    trial_id: trial_id.to_string(),
                })
            })
    }

    async fn observations_at_rung(
        &self,
        study_id: &str,
        bracket: u64,
        rung: u64,
    ) -> HoptResult<Vec<(TrialId, f64)>> {
        let record = self.record(study_id)?;
        let observations = record.observations.read();
        Ok(observations
            .iter()
            .filter(|((_, r), (b, _))| *r == rung && *b == bracket)
            .map(|((trial_id, _), (_, value))| (*trial_id, *value))
            .collect())
    }

    async fn delete_study(&self, id: &str) -> HoptResult<()> {
        self.studies.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_types::{ComponentSpec, Goal};

    fn new_study(id: &str) -> Study {
        Study::new(id, Goal::Minimize, ComponentSpec::new("random")).with_seed(1)
    }

    #[tokio::test]
    async fn put_study_is_idempotent_on_identical_content() {
        let store = InMemoryStore::new();
        store.put_study(new_study("s1")).await.unwrap();
        store.put_study(new_study("s1")).await.unwrap();
    }

    #[tokio::test]
    async fn put_study_rejects_conflicting_redefinition() {
        let store = InMemoryStore::new();
        store.put_study(new_study("s1")).await.unwrap();
        let mut different = new_study("s1");
        different.seed = 999;
        let err = store.put_study(different).await.unwrap_err();
        assert!(matches!(
            err,
            HoptError::Store(StoreError::StudyAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn add_trial_assigns_dense_indices() {
        let store = InMemoryStore::new();
        store.put_study(new_study("s1")).await.unwrap();
        for i in 0..5 {
            let t = store.add_trial("s1", ParamMap::new(), 0, i).await.unwrap();
            assert_eq!(t.index, i);
        }
    }

    #[tokio::test]
    async fn add_trial_is_linearizable_under_concurrency() {
        let store = Arc::new(InMemoryStore::new());
        store.put_study(new_study("s1")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..50u64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.add_trial("s1", ParamMap::new(), 0, i).await.unwrap()
            }));
        }
        let mut indices: Vec<u64> = Vec::new();
        for h in handles {
            indices.push(h.await.unwrap().index);
        }
        indices.sort_unstable();
        let expected: Vec<u64> = (0..50).collect();
        assert_eq!(indices, expected, "indices must be dense and gap-free");
    }

    #[tokio::test]
    async fn update_trial_rejects_terminal_rewrite() {
        let store = InMemoryStore::new();
        store.put_study(new_study("s1")).await.unwrap();
        let trial = store.add_trial("s1", ParamMap::new(), 0, 0).await.unwrap();
        store
            .update_trial("s1", trial.id, TrialPatch::succeeded(1.0, HashMap::new()))
            .await
            .unwrap();
        let err = store
            .update_trial("s1", trial.id, TrialPatch::failed("late update"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HoptError::Store(StoreError::TerminalTrialWrite { .. })
        ));
    }

    #[tokio::test]
    async fn record_observation_is_idempotent_on_same_rung() {
        let store = InMemoryStore::new();
        store.put_study(new_study("s1")).await.unwrap();
        let trial = store.add_trial("s1", ParamMap::new(), 0, 0).await.unwrap();
        store
            .record_observation("s1", trial.id, 0, 1, 5.0)
            .await
            .unwrap();
        store
            .record_observation("s1", trial.id, 0, 1, 7.0)
            .await
            .unwrap();
        let at_rung = store.observations_at_rung("s1", 0, 1).await.unwrap();
        assert_eq!(at_rung.len(), 1);
        assert_eq!(at_rung[0].1, 7.0);
    }

    #[tokio::test]
    async fn set_study_status_rejects_illegal_transition() {
        let store = InMemoryStore::new();
        store.put_study(new_study("s1")).await.unwrap();
        store
            .set_study_status("s1", StudyStatus::Running)
            .await
            .unwrap();
        store
            .set_study_status("s1", StudyStatus::Completed)
            .await
            .unwrap();
        let err = store
            .set_study_status("s1", StudyStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HoptError::Store(StoreError::IllegalStudyTransition { .. })
        ));
    }

    #[tokio::test]
    async fn delete_study_cascades() {
        let store = InMemoryStore::new();
        store.put_study(new_study("s1")).await.unwrap();
        store.add_trial("s1", ParamMap::new(), 0, 0).await.unwrap();
        store.delete_study("s1").await.unwrap();
        assert!(store.get_study("s1").await.is_err());
    }
}
