//! Object store implementations.

pub mod fs;
pub mod s3;

pub use fs::FsObjectStore;
pub use s3::S3ObjectStore;
