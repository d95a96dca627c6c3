//! Job execution and lifecycle engine.
//!
//! - [`job`]: one execution instance, its state machine and close pipeline.
//! - [`registry`]: the in-memory index of active jobs.
//! - [`pipeline`]: log retrieval with retry, metadata assembly.
//! - [`orchestrator`]: status/completion loops, query surface, shutdown.

pub mod config;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;

pub use config::EngineConfig;
pub use error::EngineError;
pub use job::{Job, JobContext};
pub use orchestrator::{Backends, JobSummary, Orchestrator};
pub use registry::{JobRegistry, KillAllReport};
