//! # hopt-types
//!
//! Core data model (Study, Trial, Observation), error taxonomy, and
//! deterministic seed derivation shared by every crate in the
//! hyperparameter-optimization workspace.

pub mod errors;
pub mod seed;
pub mod study;
pub mod trial;

pub use errors::{HoptError, HoptResult, SamplerError, StoreError, ValidationError};
pub use seed::{derive_tagged_seed, derive_trial_seed, rng_from_seed};
pub use study::{ComponentSpec, Goal, MaxTrials, Study, StudyStatus};
pub use trial::{
    HistorySnapshot, Observation, ParamMap, ParamValue, TerminalTrial, Trial, TrialId, TrialStatus,
};
