//! # hopt-coordinator
//!
//! The Study Coordinator (spec §4.5): drives trial dispatch at bounded
//! parallelism, wires the Sampler and Pruner families to the Trial Store,
//! and exposes both the automatic `run` entry point and a manual
//! `suggest`/`complete` facade (spec §6.1) over the same plumbing.

pub mod coordinator;
pub mod events;
pub mod handle;
pub mod report;

pub use coordinator::{Coordinator, RunOutcome};
pub use events::{ChannelSink, Event, EventSink, NullSink};
pub use handle::StudyHandle;
pub use report::{ReportSignal, Reporter, ScoreOutcome, Scorer};
