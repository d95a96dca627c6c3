//! External collaborators of the execution engine.
//!
//! - [`backend`]: compute backends (local container engine, AWS Batch).
//! - [`digest`]: image digest lookups for provenance metadata.
//! - [`storage`]: durable object stores (S3, local directory).
//! - [`process`]: the CLI runner the container engine and AWS adapters share.

pub mod backend;
pub mod digest;
pub mod process;
pub mod storage;
