//! Image digest resolution.
//!
//! Digests are resolved when a job closes, not when it is submitted, so a
//! tag moved in between is recorded as what actually ran. The lookup
//! strategy follows the image URI: provider-managed registries go through
//! [`EcrDigestSource`], everything else through [`DockerHubDigestSource`].

use std::sync::Arc;

use async_trait::async_trait;
use procapi_core::image::{ImageReference, RegistryKind};

pub mod dockerhub;
pub mod ecr;

pub use dockerhub::DockerHubDigestSource;
pub use ecr::EcrDigestSource;

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// The registry has no image for the reference.
    #[error("Image not found in registry: {0}")]
    NotFound(String),

    #[error("Registry request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Registry returned HTTP {status} for {image}")]
    HttpStatus { status: u16, image: String },

    /// AWS API call failed outside the cases above.
    #[error("Registry request failed: {0}")]
    Aws(String),

    #[error("Unexpected registry response: {0}")]
    Parse(String),
}

/// One registry lookup strategy.
#[async_trait]
pub trait DigestSource: Send + Sync {
    async fn digest(&self, image: &ImageReference) -> Result<String, DigestError>;
}

/// Picks the lookup strategy from the image URI.
#[derive(Clone)]
pub struct DigestResolver {
    managed: Arc<dyn DigestSource>,
    public: Arc<dyn DigestSource>,
}

impl DigestResolver {
    pub fn new(managed: Arc<dyn DigestSource>, public: Arc<dyn DigestSource>) -> Self {
        Self { managed, public }
    }

    /// Resolve the digest of `uri`. An inline `@digest` is returned as is.
    pub async fn resolve(&self, uri: &str) -> Result<String, DigestError> {
        let image = ImageReference::parse(uri)
            .map_err(|e| DigestError::InvalidReference(e.to_string()))?;
        if let Some(digest) = &image.digest {
            return Ok(digest.clone());
        }
        match image.registry_kind() {
            RegistryKind::Managed { .. } => self.managed.digest(&image).await,
            RegistryKind::Public => self.public.digest(&image).await,
        }
    }
}
