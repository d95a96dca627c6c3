//! Row structs and their mapping onto domain types.

pub mod job;
pub mod status;
