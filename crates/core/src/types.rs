/// Opaque job identifier (UUID v4 rendered as a string).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

/// The "zero" timestamp recorded when a backend never reported a value.
pub fn zero_timestamp() -> Timestamp {
    Timestamp::default()
}
