//! Container image reference parsing and registry classification.
//!
//! Digest resolution picks its strategy from the shape of the image URI:
//! images hosted in a provider-managed registry (AWS ECR) are looked up
//! through the provider API, everything else through the public registry's
//! tag API.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

/// Tag assumed when an image reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// `<account>.dkr.ecr.<region>.amazonaws.com[.cn]`
static ECR_HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{12})\.dkr\.ecr(?:-fips)?\.([a-z0-9-]+)\.amazonaws\.com(?:\.cn)?$")
        .expect("valid regex")
});

/// Where an image lives, as far as digest resolution is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryKind {
    /// Provider-managed registry (AWS ECR).
    Managed { account_id: String, region: String },
    /// Public registry resolved by tag lookup (Docker Hub or compatible).
    Public,
}

/// A parsed image reference: `[registry/]repository[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: String,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(uri: &str) -> Result<Self, CoreError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(CoreError::Validation("Image reference must not be empty".into()));
        }
        if uri.chars().any(char::is_whitespace) {
            return Err(CoreError::Validation(format!(
                "Image reference '{uri}' must not contain whitespace"
            )));
        }

        let (name, digest) = match uri.split_once('@') {
            Some((name, digest)) if !digest.is_empty() => (name, Some(digest.to_string())),
            Some(_) => {
                return Err(CoreError::Validation(format!(
                    "Image reference '{uri}' has an empty digest"
                )))
            }
            None => (uri, None),
        };

        // A leading component is a registry host if it looks like one.
        let (registry, remainder) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest)
            }
            _ => (None, name),
        };

        // The tag separator is the last ':' after the last '/'.
        let last_segment_start = remainder.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match remainder[last_segment_start..].rfind(':') {
            Some(i) => {
                let split = last_segment_start + i;
                (&remainder[..split], &remainder[split + 1..])
            }
            None => (remainder, DEFAULT_TAG),
        };

        if repository.is_empty() || tag.is_empty() {
            return Err(CoreError::Validation(format!(
                "Invalid image reference '{uri}'"
            )));
        }

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag: tag.to_string(),
            digest,
        })
    }

    /// Classify the hosting registry.
    pub fn registry_kind(&self) -> RegistryKind {
        self.registry
            .as_deref()
            .and_then(|host| ECR_HOST_RE.captures(host))
            .map_or(RegistryKind::Public, |caps| RegistryKind::Managed {
                account_id: caps[1].to_string(),
                region: caps[2].to_string(),
            })
    }
}
