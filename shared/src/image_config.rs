use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::config_cache::{ConfigCache, ConfigLoader, Revalidation, CONFIG_CACHE_TTL};
use crate::error::ConfigError;
use crate::fetch_timeout::{HttpClient, TimeoutFetcher, FETCH_TIMEOUT};
use crate::types::{EffectiveImageConfig, ImageConfigLayer, RemoteConfigDocument};

pub const ENV_DOMAINS: &str = "TF_NEXTIMAGE_DOMAINS";
pub const ENV_DEVICE_SIZES: &str = "TF_NEXTIMAGE_DEVICE_SIZES";
pub const ENV_IMAGE_SIZES: &str = "TF_NEXTIMAGE_IMAGE_SIZES";
pub const ENV_FORMATS: &str = "TF_NEXTIMAGE_FORMATS";
pub const ENV_DANGEROUSLY_ALLOW_SVG: &str = "TF_NEXTIMAGE_DANGEROUSLY_ALLOW_SVG";
pub const ENV_CONTENT_SECURITY_POLICY: &str = "TF_NEXTIMAGE_CONTENT_SECURITY_POLICY";

/// Read the per-field overrides from the process environment
pub fn env_overrides() -> ImageConfigLayer {
    env_overrides_from(|key| std::env::var(key).ok())
}

/// Build the override layer from an arbitrary lookup. Every variable holds a
/// JSON value; one that fails to parse is logged and left out.
pub fn env_overrides_from<F>(lookup: F) -> ImageConfigLayer
where
    F: Fn(&str) -> Option<String>,
{
    ImageConfigLayer {
        domains: parse_from_env(&lookup, ENV_DOMAINS),
        device_sizes: parse_from_env(&lookup, ENV_DEVICE_SIZES),
        image_sizes: parse_from_env(&lookup, ENV_IMAGE_SIZES),
        formats: parse_from_env(&lookup, ENV_FORMATS),
        dangerously_allow_svg: parse_from_env(&lookup, ENV_DANGEROUSLY_ALLOW_SVG),
        minimum_cache_ttl: None,
        content_security_policy: parse_from_env(&lookup, ENV_CONTENT_SECURITY_POLICY),
    }
    .sanitized("environment")
}

fn parse_from_env<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: DeserializeOwned,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Could not parse {} from environment variable: {}", key, e);
            None
        }
    }
}

/// Loads `<endpoint>/<hostname>` documents for the config cache
pub struct RemoteConfigLoader {
    endpoint: String,
    fetcher: TimeoutFetcher,
    timeout: Duration,
}

impl RemoteConfigLoader {
    pub fn new(endpoint: &str, client: Arc<dyn HttpClient>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            fetcher: TimeoutFetcher::new(client),
            timeout: FETCH_TIMEOUT,
        }
    }
}

#[async_trait]
impl ConfigLoader<ImageConfigLayer> for RemoteConfigLoader {
    async fn load(
        &self,
        hostname: &str,
        validator: Option<&str>,
    ) -> Result<Revalidation<ImageConfigLayer>, ConfigError> {
        let url = format!("{}/{}", self.endpoint, hostname);
        let response = self.fetcher.fetch(&url, self.timeout, validator).await?;

        // Existing cache entry is still valid
        if response.status == 304 && validator.is_some() {
            return Ok(Revalidation::NotModified);
        }

        if response.status == 200 {
            let document: RemoteConfigDocument = serde_json::from_slice(&response.body)
                .map_err(|e| ConfigError::Parse {
                    url: url.clone(),
                    source: e,
                })?;

            let validator = response.header("etag").and_then(opaque_tag);
            if validator.is_none() {
                tracing::warn!("Config response from {} has no ETag", url);
            }

            return Ok(Revalidation::Updated {
                value: document.images.unwrap_or_default().sanitized(&url),
                validator,
            });
        }

        tracing::info!("Config endpoint answered {} for {}", response.status, url);
        Ok(Revalidation::Missing)
    }
}

/// The opaque part of an ETag, which `TimeoutFetcher` re-quotes. A weak
/// `W/` marker is dropped; `If-None-Match` uses weak comparison.
fn opaque_tag(etag: &str) -> Option<String> {
    let etag = etag.trim();
    let etag = etag.strip_prefix("W/").unwrap_or(etag);
    let tag = etag.trim_matches('"');
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_string())
    }
}

/// Produces the effective config for a tenant by layering
/// defaults < remote tenant config < environment overrides.
pub struct ImageConfigResolver {
    defaults: EffectiveImageConfig,
    overrides: ImageConfigLayer,
    remote: Option<ConfigCache<ImageConfigLayer>>,
}

impl ImageConfigResolver {
    pub fn new(defaults: EffectiveImageConfig, overrides: ImageConfigLayer) -> Self {
        Self {
            defaults,
            overrides,
            remote: None,
        }
    }

    /// Enable per-tenant config from `endpoint`
    pub fn with_remote(mut self, endpoint: &str, client: Arc<dyn HttpClient>) -> Self {
        let loader = Arc::new(RemoteConfigLoader::new(endpoint, client));
        self.remote = Some(ConfigCache::new(loader, CONFIG_CACHE_TTL));
        self
    }

    /// Never fails: any remote problem leaves the lower layers in place.
    /// An empty hostname skips the remote lookup.
    pub async fn resolve(&self, hostname: &str) -> EffectiveImageConfig {
        let mut config = self.defaults.clone();

        if let Some(cache) = &self.remote {
            if !hostname.is_empty() {
                if let Some(layer) = cache.get(hostname).await {
                    config = config.merge(&layer);
                }
            }
        }

        config.merge(&self.overrides)
    }
}
