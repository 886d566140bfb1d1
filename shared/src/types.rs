use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ========== IMAGE CONFIG ==========

/// Output formats a tenant may list in `formats`
pub const RECOGNIZED_FORMATS: &[&str] = &[
    "image/avif",
    "image/webp",
    "image/png",
    "image/jpeg",
    "image/gif",
];

/// Fully merged configuration used for one transformation call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveImageConfig {
    pub domains: BTreeSet<String>,
    pub device_sizes: Vec<u32>,
    pub image_sizes: Vec<u32>,
    pub formats: Vec<String>,
    #[serde(rename = "dangerouslyAllowSVG")]
    pub dangerously_allow_svg: bool,
    #[serde(rename = "minimumCacheTTL")]
    pub minimum_cache_ttl: u64,
    pub content_security_policy: Option<String>,
}

impl Default for EffectiveImageConfig {
    fn default() -> Self {
        Self {
            domains: BTreeSet::new(),
            device_sizes: vec![640, 750, 828, 1080, 1200, 1920, 2048, 3840],
            image_sizes: vec![16, 32, 48, 64, 96, 128, 256, 384],
            formats: vec!["image/avif".to_string(), "image/webp".to_string()],
            dangerously_allow_svg: false,
            minimum_cache_ttl: 60,
            content_security_policy: None,
        }
    }
}

impl EffectiveImageConfig {
    /// Apply one layer on top of this config, field by field
    pub fn merge(&self, layer: &ImageConfigLayer) -> Self {
        Self {
            domains: layer.domains.clone().unwrap_or_else(|| self.domains.clone()),
            device_sizes: layer
                .device_sizes
                .clone()
                .unwrap_or_else(|| self.device_sizes.clone()),
            image_sizes: layer
                .image_sizes
                .clone()
                .unwrap_or_else(|| self.image_sizes.clone()),
            formats: layer.formats.clone().unwrap_or_else(|| self.formats.clone()),
            dangerously_allow_svg: layer
                .dangerously_allow_svg
                .unwrap_or(self.dangerously_allow_svg),
            minimum_cache_ttl: layer.minimum_cache_ttl.unwrap_or(self.minimum_cache_ttl),
            content_security_policy: layer
                .content_security_policy
                .clone()
                .or_else(|| self.content_security_policy.clone()),
        }
    }

    /// Widths a request may ask for
    pub fn allows_width(&self, width: u32) -> bool {
        self.device_sizes.contains(&width) || self.image_sizes.contains(&width)
    }
}

/// One partial configuration layer (remote tenant document or environment)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfigLayer {
    pub domains: Option<BTreeSet<String>>,
    pub device_sizes: Option<Vec<u32>>,
    pub image_sizes: Option<Vec<u32>>,
    pub formats: Option<Vec<String>>,
    #[serde(rename = "dangerouslyAllowSVG")]
    pub dangerously_allow_svg: Option<bool>,
    #[serde(rename = "minimumCacheTTL")]
    pub minimum_cache_ttl: Option<u64>,
    pub content_security_policy: Option<String>,
}

impl ImageConfigLayer {
    /// Drop fields that would break config invariants, logging each one
    pub fn sanitized(mut self, source: &str) -> Self {
        if let Some(sizes) = &self.device_sizes {
            if !valid_sizes(sizes) {
                tracing::warn!("Ignoring invalid deviceSizes from {}: {:?}", source, sizes);
                self.device_sizes = None;
            }
        }
        if let Some(sizes) = &self.image_sizes {
            if !valid_sizes(sizes) {
                tracing::warn!("Ignoring invalid imageSizes from {}: {:?}", source, sizes);
                self.image_sizes = None;
            }
        }
        if let Some(formats) = &self.formats {
            if formats
                .iter()
                .any(|f| !RECOGNIZED_FORMATS.contains(&f.as_str()))
            {
                tracing::warn!("Ignoring unrecognized formats from {}: {:?}", source, formats);
                self.formats = None;
            }
        }
        self
    }
}

fn valid_sizes(sizes: &[u32]) -> bool {
    !sizes.is_empty() && sizes.iter().all(|s| *s > 0)
}

/// Body of the remote config endpoint; only `images` is used
#[derive(Debug, Default, Deserialize)]
pub struct RemoteConfigDocument {
    #[serde(default)]
    pub images: Option<ImageConfigLayer>,
}

// ========== ORIGIN ==========

/// Where the source bytes of one request live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    Bucket { bucket: String, key: String },
    Http { url: String },
}

/// Raw source bytes plus the headers that matter downstream
#[derive(Debug, Clone, Default)]
pub struct OriginFetchResult {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

/// Output of the transformation backend
#[derive(Debug, Clone)]
pub struct TransformedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub is_static: bool,
    /// Seconds the origin allowed the result to be cached
    pub max_age: u64,
}

// ========== RESPONSE ==========

/// API Gateway proxy response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub status_code: u16,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl ResponseEnvelope {
    /// Plain-text error with no image headers
    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            headers: BTreeMap::new(),
            body: message.into(),
            is_base64_encoded: false,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
