use aws_lambda_events::apigw::ApiGatewayV2httpRequest;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use next_image_shared::fetch_timeout::{HttpClient, ReqwestClient};
use next_image_shared::image_config::{env_overrides, ImageConfigResolver};
use next_image_shared::image_processing::RasterTransformer;
use next_image_shared::optimizer::ImageOptimizer;
use next_image_shared::origin::OriginFetcher;
use next_image_shared::s3::{build_client, S3ObjectStore};
use next_image_shared::settings::Settings;
use next_image_shared::types::EffectiveImageConfig;
use next_image_shared::AppState;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .without_time()
        .init();

    // Everything below is built once and reused across warm invocations
    let settings = Settings::from_env();
    let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::default());

    let mut resolver = ImageConfigResolver::new(EffectiveImageConfig::default(), env_overrides());
    if let Some(endpoint) = &settings.config_endpoint {
        tracing::info!("Loading per-host image config from {}", endpoint);
        resolver = resolver.with_remote(endpoint, http.clone());
    }

    let mut origin = OriginFetcher::new(http);
    if let Some(bucket) = &settings.source_bucket {
        let config = aws_config::load_from_env().await;
        let client = build_client(&config, settings.local_bucket.as_ref());
        origin = origin.with_bucket(Arc::new(S3ObjectStore::new(client)), bucket);
    }
    if let Some(base_origin) = &settings.base_origin {
        origin = origin.with_base_origin(base_origin);
    }

    let state = AppState::new(
        resolver,
        ImageOptimizer::new(origin, Arc::new(RasterTransformer)),
    );

    run(service_fn(move |event: LambdaEvent<ApiGatewayV2httpRequest>| {
        let state = Arc::clone(&state);
        async move { http_handler::function_handler(event, state).await }
    }))
    .await
}
