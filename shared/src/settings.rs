use serde::Deserialize;

pub const ENV_SOURCE_BUCKET: &str = "TF_NEXTIMAGE_SOURCE_BUCKET";
pub const ENV_BASE_ORIGIN: &str = "TF_NEXTIMAGE_BASE_ORIGIN";
pub const ENV_CONFIG_ENDPOINT: &str = "IMAGE_CONFIG_ENDPOINT";
pub const ENV_LOCAL_BUCKET: &str = "__DEBUG__USE_LOCAL_BUCKET";

/// S3-compatible server used instead of AWS during local development
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalBucket {
    pub endpoint: String,
    #[serde(default)]
    pub force_path_style: bool,
}

/// Deployment settings, read once per cold start
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub source_bucket: Option<String>,
    pub base_origin: Option<String>,
    pub config_endpoint: Option<String>,
    pub local_bucket: Option<LocalBucket>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let local_bucket = non_empty(ENV_LOCAL_BUCKET).and_then(|raw| {
            match serde_json::from_str::<LocalBucket>(&raw) {
                Ok(local) => Some(local),
                Err(e) => {
                    tracing::warn!("Could not parse {}: {}", ENV_LOCAL_BUCKET, e);
                    None
                }
            }
        });

        Self {
            source_bucket: non_empty(ENV_SOURCE_BUCKET),
            base_origin: non_empty(ENV_BASE_ORIGIN).map(|v| v.trim_end_matches('/').to_string()),
            config_endpoint: non_empty(ENV_CONFIG_ENDPOINT),
            local_bucket,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_empty_environment() {
        assert_eq!(settings(&[]), Settings::default());
    }

    #[test]
    fn test_all_settings() {
        let s = settings(&[
            (ENV_SOURCE_BUCKET, "images"),
            (ENV_BASE_ORIGIN, "https://origin.example.com/"),
            (ENV_CONFIG_ENDPOINT, "https://config.example.com"),
            (
                ENV_LOCAL_BUCKET,
                r#"{"endpoint": "http://localhost:9000", "forcePathStyle": true}"#,
            ),
        ]);

        assert_eq!(s.source_bucket.as_deref(), Some("images"));
        assert_eq!(s.base_origin.as_deref(), Some("https://origin.example.com"));
        assert_eq!(s.config_endpoint.as_deref(), Some("https://config.example.com"));
        assert_eq!(
            s.local_bucket,
            Some(LocalBucket {
                endpoint: "http://localhost:9000".to_string(),
                force_path_style: true,
            })
        );
    }

    #[test]
    fn test_blank_and_malformed_values_are_ignored() {
        let s = settings(&[(ENV_SOURCE_BUCKET, "  "), (ENV_LOCAL_BUCKET, "localhost:9000")]);
        assert_eq!(s, Settings::default());
    }
}
