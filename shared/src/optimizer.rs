use base64::Engine;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache_control;
use crate::error::ImageError;
use crate::image_processing::ImageTransformer;
use crate::origin::OriginFetcher;
use crate::request::{ImageParams, ImageRequest};
use crate::types::{EffectiveImageConfig, ResponseEnvelope, TransformedImage};

/// CSP attached to SVG responses when none is configured
pub const SVG_FALLBACK_CSP: &str = "script-src 'none'; frame-src 'none'; sandbox;";

/// Validates, fetches, transforms and wraps one image request
pub struct ImageOptimizer {
    origin: OriginFetcher,
    transformer: Arc<dyn ImageTransformer>,
}

impl ImageOptimizer {
    pub fn new(origin: OriginFetcher, transformer: Arc<dyn ImageTransformer>) -> Self {
        Self {
            origin,
            transformer,
        }
    }

    /// Always produces an envelope; failures become plain-text error bodies
    pub async fn handle(
        &self,
        request: &ImageRequest,
        config: &EffectiveImageConfig,
    ) -> ResponseEnvelope {
        match self.optimize(request, config).await {
            Ok(image) => success(image, config),
            Err(e) => {
                tracing::warn!("Image request failed with {}: {}", e.status, e.message);
                ResponseEnvelope::error(e.status, e.message)
            }
        }
    }

    async fn optimize(
        &self,
        request: &ImageRequest,
        config: &EffectiveImageConfig,
    ) -> Result<TransformedImage, ImageError> {
        let params = ImageParams::parse(request, config)
            .map_err(|e| ImageError::new(400, e.to_string()))?;

        tracing::info!(
            "Optimizing {} (w={}, q={}, format={})",
            params.href,
            params.width,
            params.quality,
            params.mime_type.as_deref().unwrap_or("source")
        );

        let source = self.origin.fetch(&params.href, &request.headers).await?;

        // Decode and resize are CPU bound, keep them off the async workers
        let transformer = Arc::clone(&self.transformer);
        let config = config.clone();
        let image = tokio::task::spawn_blocking(move || {
            transformer.transform(&source, &params, &config)
        })
        .await
        .map_err(|e| {
            tracing::error!("Image transform task failed: {}", e);
            ImageError::new(500, "Unable to optimize image")
        })??;
        Ok(image)
    }
}

fn success(image: TransformedImage, config: &EffectiveImageConfig) -> ResponseEnvelope {
    let mut headers = BTreeMap::new();
    headers.insert(
        "Cache-Control".to_string(),
        cache_control::response_header(image.is_static, config.minimum_cache_ttl, image.max_age),
    );
    headers.insert("Vary".to_string(), "Accept".to_string());
    headers.insert("Content-Type".to_string(), image.content_type.clone());

    let csp = match &config.content_security_policy {
        Some(csp) => Some(csp.clone()),
        None if image.content_type == "image/svg+xml" => Some(SVG_FALLBACK_CSP.to_string()),
        None => None,
    };
    if let Some(csp) = csp {
        headers.insert("Content-Security-Policy".to_string(), csp);
    }

    ResponseEnvelope {
        status_code: 200,
        headers,
        body: base64::engine::general_purpose::STANDARD.encode(&image.bytes),
        is_base64_encoded: true,
    }
}
