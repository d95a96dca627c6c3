//! Digest resolution picks the registry strategy from the image URI.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use procapi_cloud::digest::{DigestError, DigestResolver, DigestSource};
use procapi_core::image::ImageReference;

struct CountingSource {
    label: &'static str,
    calls: AtomicUsize,
}

impl CountingSource {
    fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DigestSource for CountingSource {
    async fn digest(&self, image: &ImageReference) -> Result<String, DigestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}:{}", self.label, image.repository))
    }
}

fn resolver() -> (DigestResolver, Arc<CountingSource>, Arc<CountingSource>) {
    let managed = CountingSource::new("managed");
    let public = CountingSource::new("public");
    (
        DigestResolver::new(managed.clone(), public.clone()),
        managed,
        public,
    )
}

#[tokio::test]
async fn ecr_uri_uses_managed_lookup() {
    let (resolver, managed, public) = resolver();
    let digest = resolver
        .resolve("123456789012.dkr.ecr.us-east-1.amazonaws.com/foo:latest")
        .await
        .unwrap();
    assert_eq!(digest, "managed:foo");
    assert_eq!(managed.calls.load(Ordering::SeqCst), 1);
    assert_eq!(public.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn public_uri_uses_tag_lookup() {
    let (resolver, managed, public) = resolver();
    let digest = resolver.resolve("alpine:3.18").await.unwrap();
    assert_eq!(digest, "public:alpine");
    assert_eq!(managed.calls.load(Ordering::SeqCst), 0);
    assert_eq!(public.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pinned_digest_skips_registry() {
    let (resolver, managed, public) = resolver();
    let digest = resolver.resolve("alpine@sha256:abc").await.unwrap();
    assert_eq!(digest, "sha256:abc");
    assert_eq!(managed.calls.load(Ordering::SeqCst) + public.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_uri_is_rejected() {
    let (resolver, _, _) = resolver();
    assert!(matches!(
        resolver.resolve("").await,
        Err(DigestError::InvalidReference(_))
    ));
}
