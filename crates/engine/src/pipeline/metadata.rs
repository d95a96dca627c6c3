//! Metadata assembly at job completion.
//!
//! Combines process identity, the image that actually ran (URI plus a
//! digest resolved now, not at submission), the literal command line and
//! backend timestamps. A timestamp the backend never reported becomes the
//! zero value instead of failing the record.

use procapi_cloud::backend::Inspection;
use procapi_cloud::digest::{DigestError, DigestResolver};
use procapi_core::metadata::{ImageRef, JobMetadata, ProcessRef, METADATA_CONTEXT};
use procapi_core::storage::{metadata_key, ObjectStore, StorageError, CONTENT_TYPE_JSON};
use procapi_core::types::{zero_timestamp, JobId, Timestamp};

/// Identity and command of the job being described.
#[derive(Debug, Clone)]
pub struct MetadataSubject<'a> {
    pub job_id: &'a JobId,
    pub process_id: &'a str,
    pub process_version: &'a str,
    /// Image named in the request; used when the backend does not report one.
    pub image: &'a str,
    pub command: &'a [String],
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("error resolving image digest: {0}")]
    Digest(#[from] DigestError),

    #[error("error encoding metadata: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("error writing metadata: {0}")]
    Storage(#[from] StorageError),
}

/// Build the metadata record. `inspection` is `None` when the backend
/// could not be inspected; all timestamps are then zero.
pub async fn assemble(
    subject: &MetadataSubject<'_>,
    inspection: Option<&Inspection>,
    digests: &DigestResolver,
) -> Result<JobMetadata, MetadataError> {
    let uri = inspection
        .and_then(|i| i.image.clone())
        .unwrap_or_else(|| subject.image.to_string());
    let digest = match inspection.and_then(|i| i.image_digest.clone()) {
        Some(digest) => digest,
        None => digests.resolve(&uri).await?,
    };

    Ok(JobMetadata {
        context: METADATA_CONTEXT.to_string(),
        job_id: subject.job_id.clone(),
        process: ProcessRef {
            id: subject.process_id.to_string(),
            version: subject.process_version.to_string(),
        },
        image: ImageRef { uri, digest },
        commands: subject.command.to_vec(),
        generated_at: or_zero(inspection.and_then(|i| i.created_at)),
        started_at: or_zero(inspection.and_then(|i| i.started_at)),
        ended_at: or_zero(inspection.and_then(|i| i.finished_at)),
    })
}

fn or_zero(ts: Option<Timestamp>) -> Timestamp {
    ts.unwrap_or_else(zero_timestamp)
}

/// Write `metadata` to its deterministic key, replacing any previous object.
pub async fn store(
    storage: &dyn ObjectStore,
    prefix: &str,
    metadata: &JobMetadata,
) -> Result<String, MetadataError> {
    let key = metadata_key(prefix, &metadata.job_id);
    let body = serde_json::to_vec(metadata)?;
    storage.put(&key, body, CONTENT_TYPE_JSON).await?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use procapi_cloud::backend::BackendStatus;
    use procapi_cloud::digest::DigestSource;
    use procapi_core::image::ImageReference;

    use super::*;

    struct FixedDigest(&'static str);

    #[async_trait]
    impl DigestSource for FixedDigest {
        async fn digest(&self, _image: &ImageReference) -> Result<String, DigestError> {
            Ok(self.0.to_string())
        }
    }

    struct NoDigest;

    #[async_trait]
    impl DigestSource for NoDigest {
        async fn digest(&self, image: &ImageReference) -> Result<String, DigestError> {
            Err(DigestError::NotFound(image.repository.clone()))
        }
    }

    fn subject<'a>(id: &'a JobId, command: &'a [String]) -> MetadataSubject<'a> {
        MetadataSubject {
            job_id: id,
            process_id: "pyecho",
            process_version: "1.0",
            image: "alpine:3.18",
            command,
        }
    }

    #[tokio::test]
    async fn missing_timestamps_are_zero() {
        let resolver = DigestResolver::new(Arc::new(NoDigest), Arc::new(FixedDigest("sha256:pub")));
        let id: JobId = "j1".into();
        let command = vec!["echo".to_string()];
        let started = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut inspection = Inspection::new(BackendStatus::Succeeded);
        inspection.started_at = Some(started);

        let md = assemble(&subject(&id, &command), Some(&inspection), &resolver)
            .await
            .unwrap();
        assert_eq!(md.image.uri, "alpine:3.18");
        assert_eq!(md.image.digest, "sha256:pub");
        assert_eq!(md.started_at, started);
        assert_eq!(md.generated_at, zero_timestamp());
        assert_eq!(md.ended_at, zero_timestamp());
    }

    #[tokio::test]
    async fn backend_digest_wins_over_registry() {
        let resolver = DigestResolver::new(Arc::new(NoDigest), Arc::new(NoDigest));
        let id: JobId = "j1".into();
        let mut inspection = Inspection::new(BackendStatus::Succeeded);
        inspection.image_digest = Some("sha256:local".into());

        let md = assemble(&subject(&id, &[]), Some(&inspection), &resolver)
            .await
            .unwrap();
        assert_eq!(md.image.digest, "sha256:local");
    }

    #[tokio::test]
    async fn unresolvable_digest_is_an_error() {
        let resolver = DigestResolver::new(Arc::new(NoDigest), Arc::new(NoDigest));
        let id: JobId = "j1".into();
        let result = assemble(&subject(&id, &[]), None, &resolver).await;
        assert!(matches!(result, Err(MetadataError::Digest(_))));
    }
}
