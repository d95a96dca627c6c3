//! Pure domain types for the process execution engine.
//!
//! Everything in this crate is free of I/O: job status and its ordering,
//! inbound callback messages, the job request and its validation, log and
//! metadata record shapes, image reference parsing, and the durable storage
//! key layout together with the [`storage::ObjectStore`] contract.

pub mod error;
pub mod image;
pub mod logs;
pub mod messages;
pub mod metadata;
pub mod record;
pub mod request;
pub mod status;
pub mod storage;
pub mod types;
