//! Digest lookup through the Docker Hub tag API.

use std::time::Duration;

use async_trait::async_trait;
use procapi_core::image::ImageReference;
use serde::Deserialize;

use super::{DigestError, DigestSource};

pub const DEFAULT_HUB_URL: &str = "https://hub.docker.com";

/// Registry hosts served by the Hub tag API. A reference without a host
/// is a Hub image.
const HUB_REGISTRIES: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

/// HTTP request timeout for a single tag lookup.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct DockerHubDigestSource {
    client: reqwest::Client,
    base_url: String,
}

impl DockerHubDigestSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DigestError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Tag endpoint for `image`. Official images live under `library/`.
    ///
    /// Images hosted on any other registry are rejected; the Hub API would
    /// answer for a different image of the same name.
    pub fn tag_url(&self, image: &ImageReference) -> Result<String, DigestError> {
        if let Some(host) = image
            .registry
            .as_deref()
            .filter(|host| !HUB_REGISTRIES.contains(host))
        {
            return Err(DigestError::InvalidReference(format!(
                "{host}/{} is not hosted on Docker Hub",
                image.repository
            )));
        }
        let repository = if image.repository.contains('/') {
            image.repository.clone()
        } else {
            format!("library/{}", image.repository)
        };
        Ok(format!(
            "{}/v2/repositories/{}/tags/{}",
            self.base_url, repository, image.tag
        ))
    }
}

#[derive(Debug, Deserialize)]
struct TagReply {
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    images: Vec<TagImage>,
}

#[derive(Debug, Deserialize)]
struct TagImage {
    #[serde(default)]
    digest: Option<String>,
}

impl TagReply {
    fn into_digest(self) -> Option<String> {
        self.digest
            .or_else(|| self.images.into_iter().find_map(|i| i.digest))
            .filter(|d| !d.is_empty())
    }
}

#[async_trait]
impl DigestSource for DockerHubDigestSource {
    async fn digest(&self, image: &ImageReference) -> Result<String, DigestError> {
        let name = format!("{}:{}", image.repository, image.tag);
        let url = self.tag_url(image)?;
        let response = self.client.get(url).send().await?;
        match response.status() {
            s if s == reqwest::StatusCode::NOT_FOUND => Err(DigestError::NotFound(name)),
            s if !s.is_success() => Err(DigestError::HttpStatus {
                status: s.as_u16(),
                image: name,
            }),
            _ => response
                .json::<TagReply>()
                .await?
                .into_digest()
                .ok_or(DigestError::NotFound(name)),
        }
    }
}
