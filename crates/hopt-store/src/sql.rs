//! Relational Trial Store adapter (spec §4.1, §6.3), backed by `sqlx`.
//!
//! The core never speaks SQL outside this module (spec Design Notes): the
//! public contract is identical to [`crate::memory::InMemoryStore`]: the
//! `TrialStore` trait. Everything below — connection pooling, migrations,
//! transactions — is adapter-internal.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hopt_types::{
    ComponentSpec, Goal, HoptError, HoptResult, MaxTrials, ParamMap, Study, StoreError,
    StudyStatus, Trial, TrialId, TrialStatus,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::traits::TrialStore;
use crate::types::{now, TrialFilter, TrialPatch};

/// Everything about a study that isn't broken out into its own column,
/// round-tripped through `studies.config_blob`.
#[derive(serde::Serialize, serde::Deserialize)]
struct ConfigBlob {
    sampler: ComponentSpec,
    pruner: Option<ComponentSpec>,
    metadata: HashMap<String, serde_json::Value>,
}

/// SQL-backed implementation of [`TrialStore`]. Migrations embedded at
/// compile time are applied once at [`SqlStore::connect`] (spec §4.1:
/// "Migrations bring schema to a known version before first use").
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    pub async fn connect(database_url: &str) -> HoptResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Permanent(e.to_string()))?
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(classify)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn classify(e: sqlx::Error) -> HoptError {
    use sqlx::Error::*;
    let err = match &e {
        PoolClosed | PoolTimedOut | Io(_) => StoreError::Transient {
            message: e.to_string(),
            attempt: 1,
            max_attempts: 3,
        },
        Database(db_err) if db_err.message().contains("terminal status is a sink") => {
            StoreError::Permanent("terminal status is a sink".to_string())
        }
        _ => StoreError::Permanent(e.to_string()),
    };
    HoptError::Store(err)
}

fn goal_to_str(goal: Goal) -> &'static str {
    match goal {
        Goal::Minimize => "minimize",
        Goal::Maximize => "maximize",
    }
}

fn goal_from_str(s: &str) -> Goal {
    match s {
        "maximize" => Goal::Maximize,
        _ => Goal::Minimize,
    }
}

fn status_to_str(status: StudyStatus) -> &'static str {
    match status {
        StudyStatus::Pending => "pending",
        StudyStatus::Running => "running",
        StudyStatus::Paused => "paused",
        StudyStatus::Completed => "completed",
        StudyStatus::Failed => "failed",
        StudyStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(s: &str) -> StudyStatus {
    match s {
        "running" => StudyStatus::Running,
        "paused" => StudyStatus::Paused,
        "completed" => StudyStatus::Completed,
        "failed" => StudyStatus::Failed,
        "cancelled" => StudyStatus::Cancelled,
        _ => StudyStatus::Pending,
    }
}

fn trial_status_to_str(status: TrialStatus) -> &'static str {
    match status {
        TrialStatus::Running => "running",
        TrialStatus::Succeeded => "succeeded",
        TrialStatus::Pruned => "pruned",
        TrialStatus::Failed => "failed",
    }
}

fn trial_status_from_str(s: &str) -> TrialStatus {
    match s {
        "succeeded" => TrialStatus::Succeeded,
        "pruned" => TrialStatus::Pruned,
        "failed" => TrialStatus::Failed,
        _ => TrialStatus::Running,
    }
}

fn row_to_trial(row: &sqlx::sqlite::SqliteRow) -> HoptResult<Trial> {
    let id_str: String = row.try_get("id").map_err(classify)?;
    let study_id: String = row.try_get("study_id").map_err(classify)?;
    let idx: i64 = row.try_get("idx").map_err(classify)?;
    let status_str: String = row.try_get("status").map_err(classify)?;
    let bracket: i64 = row.try_get("bracket").map_err(classify)?;
    let rung: i64 = row.try_get("rung").map_err(classify)?;
    let params_blob: String = row.try_get("params_blob").map_err(classify)?;
    let score: Option<f64> = row.try_get("score").map_err(classify)?;
    let metrics_blob: String = row.try_get("metrics_blob").map_err(classify)?;
    let seed: i64 = row.try_get("seed").map_err(classify)?;
    let started_at: String = row.try_get("started_at").map_err(classify)?;
    let finished_at: Option<String> = row.try_get("finished_at").map_err(classify)?;
    let error: Option<String> = row.try_get("error").map_err(classify)?;

    let params: ParamMap = serde_json::from_str(&params_blob)?;
    let metrics: HashMap<String, f64> = serde_json::from_str(&metrics_blob)?;

    Ok(Trial {
        id: Uuid::parse_str(&id_str).map_err(|e| HoptError::Logic(e.to_string()))?,
        study_id,
        index: idx as u64,
        params,
        bracket: bracket as u64,
        rung: rung as u64,
        status: trial_status_from_str(&status_str),
        score,
        metrics,
        started_at: DateTime::parse_from_rfc3339(&started_at)
            .map_err(|e| HoptError::Logic(e.to_string()))?
            .with_timezone(&Utc),
        finished_at: finished_at
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| HoptError::Logic(e.to_string()))
            })
            .transpose()?,
        seed: seed as u64,
        error,
    })
}

#[async_trait]
impl TrialStore for SqlStore {
    async fn put_study(&self, study: Study) -> HoptResult<()> {
        let existing = sqlx::query("SELECT goal, seed, max_trials, parallelism, config_blob FROM studies WHERE id = ?")
            .bind(study.id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        let config_blob = serde_json::to_string(&ConfigBlob {
            sampler: study.sampler.clone(),
            pruner: study.pruner.clone(),
            metadata: study.metadata.clone(),
        })?;

        let max_trials: Option<i64> = match study.max_trials {
            MaxTrials::Bounded(n) => Some(n as i64),
            MaxTrials::Unbounded => None,
        };

        if let Some(row) = existing {
            let same = row.try_get::<String, _>("goal").ok().as_deref() == Some(goal_to_str(study.goal))
                && row.try_get::<i64, _>("seed").ok() == Some(study.seed as i64)
                && row.try_get::<Option<i64>, _>("max_trials").ok() == Some(max_trials)
                && row.try_get::<i64, _>("parallelism").ok() == Some(study.parallelism as i64)
                && row.try_get::<String, _>("config_blob").ok() == Some(config_blob.clone());
            return if same {
                Ok(())
            } else {
                Err(StoreError::StudyAlreadyExists(study.id).into())
            };
        }

        sqlx::query(
            "INSERT INTO studies (id, goal, status, seed, max_trials, parallelism, config_blob, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(study.id.as_str())
        .bind(goal_to_str(study.goal))
        .bind(status_to_str(study.status))
        .bind(study.seed as i64)
        .bind(max_trials)
        .bind(study.parallelism as i64)
        .bind(config_blob)
        .bind(study.created_at.to_rfc3339())
        .bind(study.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }

    async fn get_study(&self, id: &str) -> HoptResult<Study> {
        let row = sqlx::query(
            "SELECT id, goal, status, seed, max_trials, parallelism, config_blob, created_at, updated_at
             FROM studies WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .ok_or_else(|| StoreError::StudyNotFound(id.to_string()))?;

        let config_blob: String = row.try_get("config_blob").map_err(classify)?;
        let config: ConfigBlob = serde_json::from_str(&config_blob)?;
        let max_trials: Option<i64> = row.try_get("max_trials").map_err(classify)?;
        let created_at: String = row.try_get("created_at").map_err(classify)?;
        let updated_at: String = row.try_get("updated_at").map_err(classify)?;

        Ok(Study {
            id: row.try_get::<String, _>("id").map_err(classify)?,
            goal: goal_from_str(&row.try_get::<String, _>("goal").map_err(classify)?),
            max_trials: match max_trials {
                Some(n) => MaxTrials::Bounded(n as u64),
                None => MaxTrials::Unbounded,
            },
            parallelism: row.try_get::<i64, _>("parallelism").map_err(classify)? as u32,
            seed: row.try_get::<i64, _>("seed").map_err(classify)? as u64,
            status: status_from_str(&row.try_get::<String, _>("status").map_err(classify)?),
            sampler: config.sampler,
            pruner: config.pruner,
            metadata: config.metadata,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| HoptError::Logic(e.to_string()))?
                .with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map_err(|e| HoptError::Logic(e.to_string()))?
                .with_timezone(&Utc),
        })
    }

    async fn set_study_status(&self, id: &str, status: StudyStatus) -> HoptResult<()> {
        let current = self.get_study(id).await?;
        if !current.status.can_transition_to(status) {
            return Err(HoptError::Store(StoreError::IllegalStudyTransition {
                from: format!("{:?}", current.status),
                to: format!("{:?}", status),
            }));
        }
        sqlx::query("UPDATE studies SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status_to_str(status))
            .bind(now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn add_trial(
        &self,
        study_id: &str,
        params: ParamMap,
        bracket: u64,
        seed: u64,
    ) -> HoptResult<Trial> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trials WHERE study_id = ?")
            .bind(study_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(classify)?;

        let mut trial = Trial::new(study_id, count as u64, params, seed);
        trial.bracket = bracket;

        let params_blob = serde_json::to_string(&trial.params)?;
        let metrics_blob = serde_json::to_string(&trial.metrics)?;

        sqlx::query(
            "INSERT INTO trials (id, study_id, idx, status, bracket, rung, params_blob, score, metrics_blob, seed, started_at, finished_at, error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(trial.id.to_string())
        .bind(trial.study_id.as_str())
        .bind(trial.index as i64)
        .bind(trial_status_to_str(trial.status))
        .bind(trial.bracket as i64)
        .bind(trial.rung as i64)
        .bind(params_blob)
        .bind(trial.score)
        .bind(metrics_blob)
        .bind(trial.seed as i64)
        .bind(trial.started_at.to_rfc3339())
        .bind(Option::<String>::None)
        .bind(Option::<String>::None)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(trial)
    }

    async fn update_trial(&self, study_id: &str, trial_id: TrialId, patch: TrialPatch) -> HoptResult<()> {
        let current_status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM trials WHERE study_id = ? AND id = ?",
        )
        .bind(study_id)
        .bind(trial_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        let current_status = current_status.ok_or_else(|| StoreError::TrialNotFound {
            study_id: study_id.to_string(),
            trial_id: trial_id.to_string(),
        })?;

        if trial_status_from_str(&current_status).is_terminal() {
            return Err(HoptError::Store(StoreError::TerminalTrialWrite {
                trial_id: trial_id.to_string(),
                status: current_status,
            }));
        }

        let score = if patch.status.carries_score() {
            patch.score
        } else {
            None
        };
        let metrics_blob = serde_json::to_string(&patch.metrics)?;

        sqlx::query(
            "UPDATE trials SET status = ?, score = ?, metrics_blob = ?, error = ?, finished_at = ?
             WHERE study_id = ? AND id = ?",
        )
        .bind(trial_status_to_str(patch.status))
        .bind(score)
        .bind(metrics_blob)
        .bind(patch.error)
        .bind(now().to_rfc3339())
        .bind(study_id)
        .bind(trial_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

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
        sqlx::query(
            "INSERT INTO observations (study_id, trial_id, bracket, rung, value)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (trial_id, rung) DO UPDATE SET value = excluded.value, bracket = excluded.bracket",
        )
        .bind(study_id)
        .bind(trial_id.to_string())
        .bind(bracket as i64)
        .bind(rung as i64)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn list_trials(&self, study_id: &str, filter: TrialFilter) -> HoptResult<Vec<Trial>> {
        let rows = sqlx::query(
            "SELECT id, study_id, idx, status, bracket, rung, params_blob, score, metrics_blob, seed, started_at, finished_at, error
             FROM trials WHERE study_id = ? ORDER BY idx ASC",
        )
        .bind(study_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let trial = row_to_trial(row)?;
            if filter.matches(trial.status, trial.index, trial.bracket) {
                out.push(trial);
            }
        }
        Ok(out)
    }

    async fn fetch_trial(&self, study_id: &str, trial_id: TrialId) -> HoptResult<Trial> {
        let row = sqlx::query(
            "SELECT id, study_id, idx, status, bracket, rung, params_blob, score, metrics_blob, seed, started_at, finished_at, error
             FROM trials WHERE study_id = ? AND id = ?",
        )
        .bind(study_id)
        .bind(trial_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .ok_or_else(|| StoreError::TrialNotFound {
            study_id: study_id.to_string(),
            trial_id: trial_id.to_string(),
        })?;
        row_to_trial(&row)
    }

    async fn observations_at_rung(
        &self,
        study_id: &str,
        bracket: u64,
        rung: u64,
    ) -> HoptResult<Vec<(TrialId, f64)>> {
        let rows = sqlx::query(
            "SELECT trial_id, value FROM observations WHERE study_id = ? AND bracket = ? AND rung = ?",
        )
        .bind(study_id)
        .bind(bracket as i64)
        .bind(rung as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.into_iter()
            .map(|row| {
                let trial_id: String = row.try_get("trial_id").map_err(classify)?;
                let value: f64 = row.try_get("value").map_err(classify)?;
                Ok((
                    Uuid::parse_str(&trial_id).map_err(|e| HoptError::Logic(e.to_string()))?,
                    value,
                ))
            })
            .collect()
    }

    async fn delete_study(&self, id: &str) -> HoptResult<()> {
        sqlx::query("DELETE FROM studies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_types::{ComponentSpec, Goal};

    async fn store() -> SqlStore {
        SqlStore::connect("sqlite::memory:").await.unwrap()
    }

    fn new_study(id: &str) -> Study {
        Study::new(id, Goal::Minimize, ComponentSpec::new("random")).with_seed(7)
    }

    #[tokio::test]
    async fn migrations_create_expected_schema() {
        let store = store().await;
        store.put_study(new_study("s1")).await.unwrap();
        let fetched = store.get_study("s1").await.unwrap();
        assert_eq!(fetched.id, "s1");
        assert_eq!(fetched.seed, 7);
    }

    #[tokio::test]
    async fn add_trial_assigns_dense_indices() {
        let store = store().await;
        store.put_study(new_study("s1")).await.unwrap();
        for i in 0..5u64 {
            let t = store.add_trial("s1", ParamMap::new(), 0, i).await.unwrap();
            assert_eq!(t.index, i);
        }
    }

    #[tokio::test]
    async fn update_trial_rejects_terminal_rewrite() {
        let store = store().await;
        store.put_study(new_study("s1")).await.unwrap();
        let trial = store.add_trial("s1", ParamMap::new(), 0, 0).await.unwrap();
        store
            .update_trial("s1", trial.id, TrialPatch::succeeded(2.0, HashMap::new()))
            .await
            .unwrap();
        let err = store
            .update_trial("s1", trial.id, TrialPatch::failed("late"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HoptError::Store(StoreError::TerminalTrialWrite { .. })
        ));
    }

    #[tokio::test]
    async fn record_observation_upserts_on_same_rung() {
        let store = store().await;
        store.put_study(new_study("s1")).await.unwrap();
        let trial = store.add_trial("s1", ParamMap::new(), 0, 0).await.unwrap();
        store.record_observation("s1", trial.id, 0, 3, 1.0).await.unwrap();
        store.record_observation("s1", trial.id, 0, 3, 2.0).await.unwrap();
        let at_rung = store.observations_at_rung("s1", 0, 3).await.unwrap();
        assert_eq!(at_rung.len(), 1);
        assert_eq!(at_rung[0].1, 2.0);
    }

    #[tokio::test]
    async fn delete_study_cascades_to_trials_and_observations() {
        let store = store().await;
        store.put_study(new_study("s1")).await.unwrap();
        let trial = store.add_trial("s1", ParamMap::new(), 0, 0).await.unwrap();
        store.record_observation("s1", trial.id, 0, 0, 1.0).await.unwrap();
        store.delete_study("s1").await.unwrap();
        assert!(store.get_study("s1").await.is_err());
    }
}
