use aws_lambda_events::apigw::ApiGatewayV2httpRequest;
use lambda_runtime::{Error, LambdaEvent};
use next_image_shared::request::{ImageRequest, NormalizedHeaders};
use next_image_shared::types::ResponseEnvelope;
use next_image_shared::AppState;
use std::sync::Arc;

/// Main Lambda handler - one image optimization per API Gateway event
pub(crate) async fn function_handler(
    event: LambdaEvent<ApiGatewayV2httpRequest>,
    state: Arc<AppState>,
) -> Result<ResponseEnvelope, Error> {
    let payload = event.payload;

    let headers = NormalizedHeaders::from_pairs(
        payload
            .headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
    );
    let query = payload.raw_query_string.unwrap_or_default();

    // Per-host config is keyed by the Host header
    let hostname = headers
        .get("host")
        .map(|h| h.to_string())
        .or(payload.request_context.domain_name)
        .unwrap_or_default();

    tracing::info!("Image request for {} ?{}", hostname, query);

    let config = state.resolver.resolve(&hostname).await;
    let response = state
        .optimizer
        .handle(&ImageRequest { query, headers }, &config)
        .await;

    tracing::info!("Responding with {}", response.status_code);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use next_image_shared::image_config::ImageConfigResolver;
    use next_image_shared::image_processing::RasterTransformer;
    use next_image_shared::optimizer::ImageOptimizer;
    use next_image_shared::origin::OriginFetcher;
    use next_image_shared::fetch_timeout::ReqwestClient;
    use next_image_shared::types::{EffectiveImageConfig, ImageConfigLayer};

    fn event(raw_query: &str) -> LambdaEvent<ApiGatewayV2httpRequest> {
        let payload: ApiGatewayV2httpRequest = serde_json::from_value(serde_json::json!({
            "version": "2.0",
            "routeKey": "$default",
            "rawPath": "/_next/image",
            "rawQueryString": raw_query,
            "headers": {
                "accept": "image/avif,image/webp,*/*",
                "host": "site.example.com"
            },
            "requestContext": {
                "accountId": "123456789012",
                "apiId": "api-id",
                "domainName": "site.example.com",
                "domainPrefix": "site",
                "http": {
                    "method": "GET",
                    "path": "/_next/image",
                    "protocol": "HTTP/1.1",
                    "sourceIp": "127.0.0.1",
                    "userAgent": "test"
                },
                "requestId": "id",
                "routeKey": "$default",
                "stage": "$default",
                "time": "12/Mar/2020:19:03:58 +0000",
                "timeEpoch": 1583348638390i64
            },
            "isBase64Encoded": false
        }))
        .unwrap();

        LambdaEvent::new(payload, Default::default())
    }

    fn state() -> Arc<AppState> {
        let resolver =
            ImageConfigResolver::new(EffectiveImageConfig::default(), ImageConfigLayer::default());
        let origin = OriginFetcher::new(Arc::new(ReqwestClient::default()));
        AppState::new(resolver, ImageOptimizer::new(origin, Arc::new(RasterTransformer)))
    }

    #[tokio::test]
    async fn test_invalid_width_returns_error_envelope() {
        let response = function_handler(event("url=%2Fa.png&w=1081"), state())
            .await
            .unwrap();

        assert_eq!(response.status_code, 400);
        assert_eq!(response.body, "\"w\" parameter (width) of 1081 is not allowed");
        assert!(!response.is_base64_encoded);
    }

    #[tokio::test]
    async fn test_missing_url_parameter() {
        let response = function_handler(event("w=64"), state()).await.unwrap();

        assert_eq!(response.status_code, 400);
        assert_eq!(response.body, "\"url\" parameter is required");
    }

    #[tokio::test]
    async fn test_unresolvable_origin() {
        let response = function_handler(event("url=%2Fa.png&w=64"), state())
            .await
            .unwrap();

        assert_eq!(response.status_code, 404);
        assert_eq!(response.body, "could not resolve an origin for /a.png");
    }
}
