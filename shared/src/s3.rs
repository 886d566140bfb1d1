use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;

use crate::error::OriginError;
use crate::origin::{ObjectStore, StoredObject};
use crate::settings::LocalBucket;

/// Source bucket reads through the AWS SDK
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<StoredObject>, OriginError> {
        let result = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(result) => result,
            Err(e) => {
                if e.as_service_error().map_or(false, |se| se.is_no_such_key()) {
                    tracing::info!("No object {} in bucket {}", key, bucket);
                    return Ok(None);
                }
                tracing::error!("Failed to get object from S3: {}", e);
                return Err(OriginError::Store {
                    key: key.to_string(),
                    source: Box::new(e),
                });
            }
        };

        let content_type = result.content_type().map(|v| v.to_string());
        let cache_control = result.cache_control().map(|v| v.to_string());

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| OriginError::Store {
                key: key.to_string(),
                source: Box::new(e),
            })?
            .into_bytes();

        Ok(Some(StoredObject {
            body: body.to_vec(),
            content_type,
            cache_control,
        }))
    }
}

/// S3 client from the ambient AWS config, optionally pointed at a local
/// S3-compatible server
pub fn build_client(config: &aws_config::SdkConfig, local: Option<&LocalBucket>) -> S3Client {
    match local {
        Some(local) => {
            tracing::info!("Using local bucket endpoint {}", local.endpoint);
            let s3_config = aws_sdk_s3::config::Builder::from(config)
                .endpoint_url(&local.endpoint)
                .force_path_style(local.force_path_style)
                .build();
            S3Client::from_conf(s3_config)
        }
        None => S3Client::new(config),
    }
}
