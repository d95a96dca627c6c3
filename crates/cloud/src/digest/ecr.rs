//! Digest lookup against AWS ECR via `DescribeImages`.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ecr::config::Region;
use aws_sdk_ecr::error::DisplayErrorContext;
use aws_sdk_ecr::operation::describe_images::DescribeImagesError;
use aws_sdk_ecr::types::ImageIdentifier;
use aws_sdk_ecr::Client as EcrClient;
use procapi_core::image::{ImageReference, RegistryKind};

use super::{DigestError, DigestSource};

/// ECR lookups are issued in the region named by the image URI, so the
/// source keeps the shared config and derives a client per call.
pub struct EcrDigestSource {
    config: SdkConfig,
}

impl EcrDigestSource {
    pub fn new(config: SdkConfig) -> Self {
        Self { config }
    }

    pub async fn from_env() -> Self {
        Self::new(aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await)
    }

    fn client(&self, region: &str) -> EcrClient {
        let config = aws_sdk_ecr::config::Builder::from(&self.config)
            .region(Region::new(region.to_string()))
            .build();
        EcrClient::from_conf(config)
    }
}

/// Registry account and region an ECR image lives in.
#[derive(Debug, PartialEq, Eq)]
struct EcrTarget {
    registry_id: String,
    region: String,
}

fn target(image: &ImageReference) -> Result<EcrTarget, DigestError> {
    match image.registry_kind() {
        RegistryKind::Managed { account_id, region } => Ok(EcrTarget {
            registry_id: account_id,
            region,
        }),
        RegistryKind::Public => Err(DigestError::InvalidReference(format!(
            "{} is not an ECR image",
            image.repository
        ))),
    }
}

fn classify_describe_error(err: DescribeImagesError, image: &ImageReference) -> DigestError {
    if err.is_image_not_found_exception() || err.is_repository_not_found_exception() {
        DigestError::NotFound(format!("{}:{}", image.repository, image.tag))
    } else {
        DigestError::Aws(DisplayErrorContext(&err).to_string())
    }
}

#[async_trait]
impl DigestSource for EcrDigestSource {
    async fn digest(&self, image: &ImageReference) -> Result<String, DigestError> {
        let target = target(image)?;
        let output = self
            .client(&target.region)
            .describe_images()
            .registry_id(target.registry_id)
            .repository_name(&image.repository)
            .image_ids(ImageIdentifier::builder().image_tag(&image.tag).build())
            .send()
            .await
            .map_err(|e| classify_describe_error(e.into_service_error(), image))?;

        output
            .image_details()
            .iter()
            .find_map(|detail| detail.image_digest())
            .map(str::to_string)
            .ok_or_else(|| DigestError::NotFound(format!("{}:{}", image.repository, image.tag)))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use aws_sdk_ecr::types::error::{ImageNotFoundException, ServerException};

    use super::*;

    #[test]
    fn target_comes_from_registry_host() {
        let image =
            ImageReference::parse("123456789012.dkr.ecr.us-east-1.amazonaws.com/foo:latest")
                .unwrap();
        assert_eq!(
            target(&image).unwrap(),
            EcrTarget {
                registry_id: "123456789012".into(),
                region: "us-east-1".into(),
            }
        );
    }

    #[test]
    fn public_image_is_rejected() {
        let image = ImageReference::parse("alpine:3.18").unwrap();
        assert_matches!(target(&image), Err(DigestError::InvalidReference(_)));
    }

    #[test]
    fn missing_image_is_not_found() {
        let image =
            ImageReference::parse("123456789012.dkr.ecr.eu-west-1.amazonaws.com/foo:v2").unwrap();
        let err = DescribeImagesError::ImageNotFoundException(
            ImageNotFoundException::builder()
                .message("The image with imageId {imageTag:'v2'} does not exist")
                .build(),
        );
        assert_matches!(
            classify_describe_error(err, &image),
            DigestError::NotFound(name) if name == "foo:v2"
        );

        let err = DescribeImagesError::ServerException(ServerException::builder().build());
        assert_matches!(classify_describe_error(err, &image), DigestError::Aws(_));
    }
}
