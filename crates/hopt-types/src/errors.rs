use thiserror::Error;

/// Aggregate error type for the optimization engine.
///
/// Every subsystem (store, sampler, pruner, coordinator) surfaces its
/// failures through one of these variants rather than its own crate-local
/// error type, so callers at the API boundary (spec §6) match on a single
/// stable set of category tags (spec §7) instead of chasing error types
/// across crate boundaries.
#[derive(Error, Debug)]
pub enum HoptError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sampler error: {0}")]
    Sampler(#[from] SamplerError),

    #[error("numeric error: {0}")]
    Numeric(String),

    #[error("scoring function error: {0}")]
    ScoringFunction(String),

    #[error("internal invariant broken: {0}")]
    Logic(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raised synchronously from `create_study` (spec §7): malformed search
/// space, out-of-range bounds, incompatible distribution/sampler combos.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("uniform bounds invalid for {name}: lo={lo} must be < hi={hi}")]
    UniformBounds { name: String, lo: f64, hi: f64 },

    #[error("log_uniform bounds invalid for {name}: require 0 < lo={lo} < hi={hi}")]
    LogUniformBounds { name: String, lo: f64, hi: f64 },

    #[error("int bounds invalid for {name}: lo={lo} must be <= hi={hi}")]
    IntBounds { name: String, lo: i64, hi: i64 },

    #[error("discrete_uniform step invalid for {name}: step={step} must be > 0")]
    NonPositiveStep { name: String, step: f64 },

    #[error("choice for {name} must have at least one value")]
    EmptyChoice { name: String },

    #[error("study id must not be empty")]
    EmptyStudyId,

    #[error("parallelism must be >= 1, got {0}")]
    ZeroParallelism(u32),

    #[error("unknown sampler: {0}")]
    UnknownSampler(String),

    #[error("unknown pruner: {0}")]
    UnknownPruner(String),

    #[error("incompatible sampler/goal combination: {message}")]
    IncompatibleCombo { message: String },
}

/// Trial Store failure categories (spec §4.1, §7).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("study already exists: {0}")]
    StudyAlreadyExists(String),

    #[error("study not found: {0}")]
    StudyNotFound(String),

    #[error("trial not found: study={study_id} trial={trial_id}")]
    TrialNotFound { study_id: String, trial_id: String },

    #[error("illegal study status transition: {from:?} -> {to:?}")]
    IllegalStudyTransition { from: String, to: String },

    #[error("cannot write to terminal trial {trial_id} (status={status})")]
    TerminalTrialWrite { trial_id: String, status: String },

    #[error("transient store failure (attempt {attempt}/{max_attempts}): {message}")]
    Transient {
        message: String,
        attempt: u32,
        max_attempts: u32,
    },

    #[error("permanent store failure: {0}")]
    Permanent(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sampler failure categories (spec §4.3, §7).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplerError {
    #[error("degenerate KDE for parameter {name}: bandwidth floored to zero width")]
    DegenerateKde { name: String },

    #[error("CMA-ES eigendecomposition failed at generation {generation}: {message}")]
    EigendecompositionFailed { generation: u64, message: String },

    #[error("sampler state corrupted: {0}")]
    CorruptState(String),
}

pub type HoptResult<T> = Result<T, HoptError>;

/// Creates a [`HoptError::Validation`] from a format string, mirroring the
/// teacher's `validation_error!`/`internal_error!` helper macros.
#[macro_export]
macro_rules! logic_error {
    ($($arg:tt)*) => {
        $crate::errors::HoptError::Logic(format!($($arg)*))
    };
}
