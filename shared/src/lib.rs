pub mod types;
pub mod error;
pub mod settings;
pub mod fetch_timeout;
pub mod config_cache;
pub mod image_config;
pub mod request;
pub mod cache_control;
pub mod origin;
pub mod s3;
pub mod image_processing;
pub mod optimizer;

#[cfg(test)]
mod testing;

use image_config::ImageConfigResolver;
use optimizer::ImageOptimizer;
use std::sync::Arc;

/// Shared application state, built once per cold start
pub struct AppState {
    pub resolver: ImageConfigResolver,
    pub optimizer: ImageOptimizer,
}

impl AppState {
    pub fn new(resolver: ImageConfigResolver, optimizer: ImageOptimizer) -> Arc<Self> {
        Arc::new(Self {
            resolver,
            optimizer,
        })
    }
}
