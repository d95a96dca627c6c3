//! Bridges ephemeral backend logs and image provenance into durable storage.

pub mod logs;
pub mod metadata;
