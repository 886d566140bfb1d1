use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use crate::error::OriginError;
use crate::fetch_timeout::HttpClient;
use crate::request::NormalizedHeaders;
use crate::types::{OriginFetchResult, SourceDescriptor};

/// An object read from the source bucket
#[derive(Debug, Clone, Default)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

/// Object-store capability. `Ok(None)` means the key does not exist.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str)
        -> Result<Option<StoredObject>, OriginError>;
}

struct BucketSource {
    store: Arc<dyn ObjectStore>,
    name: String,
}

/// Resolves where a request's source image lives and fetches it
pub struct OriginFetcher {
    bucket: Option<BucketSource>,
    base_origin: Option<String>,
    http: Arc<dyn HttpClient>,
}

impl OriginFetcher {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            bucket: None,
            base_origin: None,
            http,
        }
    }

    /// Serve relative URLs from `bucket`
    pub fn with_bucket(mut self, store: Arc<dyn ObjectStore>, bucket: &str) -> Self {
        self.bucket = Some(BucketSource {
            store,
            name: bucket.to_string(),
        });
        self
    }

    /// Prefix relative URLs with `base_origin` instead of the referer
    pub fn with_base_origin(mut self, base_origin: &str) -> Self {
        self.base_origin = Some(base_origin.to_string());
        self
    }

    /// Decide where `href` is read from. `None` when nothing can serve it.
    pub fn resolve(&self, href: &str, headers: &NormalizedHeaders) -> Option<SourceDescriptor> {
        // Absolute URLs were already checked against the allowed domains
        if !href.starts_with('/') {
            return Some(SourceDescriptor::Http {
                url: href.to_string(),
            });
        }

        if let Some(bucket) = &self.bucket {
            // S3 keys have no leading `/`
            let path = href.split(|c| c == '?' || c == '#').next().unwrap_or(href);
            return Some(SourceDescriptor::Bucket {
                bucket: bucket.name.clone(),
                key: path.trim_start_matches('/').to_string(),
            });
        }

        // The base origin takes precedence over the referer
        if let Some(base) = &self.base_origin {
            return Some(SourceDescriptor::Http {
                url: format!("{}{}", base, href),
            });
        }

        // The referer is a full URL with path, only its origin is used
        let referer = headers.get("referer")?;
        match Url::parse(referer) {
            Ok(url) if url.has_host() => Some(SourceDescriptor::Http {
                url: format!("{}{}", url.origin().ascii_serialization(), href),
            }),
            _ => {
                tracing::warn!("Ignoring unparsable referer: {}", referer);
                None
            }
        }
    }

    pub async fn fetch(
        &self,
        href: &str,
        headers: &NormalizedHeaders,
    ) -> Result<OriginFetchResult, OriginError> {
        match self.resolve(href, headers) {
            Some(SourceDescriptor::Bucket { bucket, key }) => self.fetch_object(&bucket, &key).await,
            Some(SourceDescriptor::Http { url }) => self.fetch_http(&url).await,
            None => {
                tracing::warn!("No origin configured for {}", href);
                Err(OriginError::Unresolved {
                    href: href.to_string(),
                })
            }
        }
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> Result<OriginFetchResult, OriginError> {
        let store = match &self.bucket {
            Some(source) => &source.store,
            None => {
                return Err(OriginError::Unresolved {
                    href: key.to_string(),
                })
            }
        };

        tracing::info!("Fetching {} from bucket {}", key, bucket);
        let object = store
            .get_object(bucket, key)
            .await?
            .filter(|object| !object.body.is_empty())
            .ok_or_else(|| OriginError::BucketObject {
                key: key.to_string(),
            })?;

        Ok(OriginFetchResult {
            status: 200,
            body: object.body,
            content_type: object.content_type,
            cache_control: object.cache_control,
        })
    }

    async fn fetch_http(&self, origin: &str) -> Result<OriginFetchResult, OriginError> {
        tracing::info!("Fetching image from {}", origin);
        let response = self.http.get(origin, &[]).await.map_err(|e| {
            tracing::warn!("Upstream request failed: {}", e);
            OriginError::Upstream {
                origin: origin.to_string(),
                status: None,
            }
        })?;

        if !response.is_success() {
            return Err(OriginError::Upstream {
                origin: origin.to_string(),
                status: Some(response.status),
            });
        }

        Ok(OriginFetchResult {
            status: response.status,
            content_type: response.header("content-type").map(|v| v.to_string()),
            cache_control: response.header("cache-control").map(|v| v.to_string()),
            body: response.body,
        })
    }
}
