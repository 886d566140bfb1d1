use std::collections::HashMap;
use thiserror::Error;
use url::Url;

use crate::types::EffectiveImageConfig;

/// Path prefix of build-time assets, which never change once deployed
const STATIC_MEDIA_PREFIX: &str = "/_next/static/media";
const DEFAULT_QUALITY: u8 = 75;

/// Request headers with lowercased names. A later duplicate overwrites an
/// earlier one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedHeaders(HashMap<String, String>);

impl NormalizedHeaders {
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }
}

/// One incoming optimization request
#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    /// Raw query string, without the leading `?`
    pub query: String,
    pub headers: NormalizedHeaders,
}

/// Validation failures, answered with status 400
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    #[error("\"url\" parameter is required")]
    UrlRequired,
    #[error("\"{0}\" parameter cannot be an array")]
    Repeated(&'static str),
    #[error("\"url\" parameter cannot be a protocol-relative URL (//)")]
    ProtocolRelative,
    #[error("\"url\" parameter is invalid")]
    UrlInvalid,
    #[error("\"url\" parameter is not allowed")]
    DomainNotAllowed,
    #[error("\"w\" parameter (width) is required")]
    WidthRequired,
    #[error("\"w\" parameter (width) must be a number greater than 0")]
    WidthInvalid,
    #[error("\"q\" parameter (quality) must be a number between 1 and 100")]
    QualityInvalid,
    #[error("\"w\" parameter (width) of {0} is not allowed")]
    WidthNotAllowed(u32),
}

/// Validated parameters for one transformation
#[derive(Debug, Clone, PartialEq)]
pub struct ImageParams {
    /// The `url` parameter as given: a path (`/img.png`) or an absolute URL
    pub href: String,
    pub is_absolute: bool,
    pub width: u32,
    pub quality: u8,
    /// Output format negotiated from `Accept`; `None` keeps the source format
    pub mime_type: Option<String>,
    pub is_static: bool,
}

impl ImageParams {
    pub fn parse(
        request: &ImageRequest,
        config: &EffectiveImageConfig,
    ) -> Result<Self, ParamError> {
        let mut urls = Vec::new();
        let mut widths = Vec::new();
        let mut qualities = Vec::new();
        for (key, value) in url::form_urlencoded::parse(request.query.as_bytes()) {
            match key.as_ref() {
                "url" => urls.push(value.into_owned()),
                "w" => widths.push(value.into_owned()),
                "q" => qualities.push(value.into_owned()),
                _ => {}
            }
        }

        let href = single("url", urls)?.ok_or(ParamError::UrlRequired)?;
        let w = single("w", widths)?;
        let q = single("q", qualities)?;

        let is_absolute = if href.starts_with('/') {
            if href.starts_with("//") {
                return Err(ParamError::ProtocolRelative);
            }
            false
        } else {
            let parsed = Url::parse(&href).map_err(|_| ParamError::UrlInvalid)?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ParamError::UrlInvalid);
            }
            let host = parsed.host_str().ok_or(ParamError::UrlInvalid)?;
            if !config.domains.contains(host) {
                return Err(ParamError::DomainNotAllowed);
            }
            true
        };

        let w = w.ok_or(ParamError::WidthRequired)?;
        let width = w
            .parse::<u32>()
            .ok()
            .filter(|w| *w > 0)
            .ok_or(ParamError::WidthInvalid)?;

        let quality = match q {
            Some(q) => q
                .parse::<u8>()
                .ok()
                .filter(|q| (1..=100).contains(q))
                .ok_or(ParamError::QualityInvalid)?,
            None => DEFAULT_QUALITY,
        };

        if !config.allows_width(width) {
            return Err(ParamError::WidthNotAllowed(width));
        }

        let mime_type = negotiate_format(request.headers.get("accept"), &config.formats);
        let is_static = !is_absolute && href.starts_with(STATIC_MEDIA_PREFIX);

        Ok(Self {
            href,
            is_absolute,
            width,
            quality,
            mime_type,
            is_static,
        })
    }
}

fn single(name: &'static str, mut values: Vec<String>) -> Result<Option<String>, ParamError> {
    match values.len() {
        0 => Ok(None),
        1 => Ok(values.pop()),
        _ => Err(ParamError::Repeated(name)),
    }
}

/// Pick the configured format the client asks for most strongly.
///
/// Only formats listed explicitly in `Accept` qualify (`*/*` does not), the
/// highest q-value wins and ties keep configured order.
pub fn negotiate_format(accept: Option<&str>, formats: &[String]) -> Option<String> {
    let accept = accept?;
    let listed: Vec<(String, f32)> = accept
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let media = pieces.next()?.trim().to_ascii_lowercase();
            let q = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            Some((media, q))
        })
        .collect();

    let mut best: Option<(&String, f32)> = None;
    for format in formats {
        let q = listed
            .iter()
            .find(|(media, _)| media == &format.to_ascii_lowercase())
            .map(|(_, q)| *q);
        if let Some(q) = q.filter(|q| *q > 0.0) {
            if best.map_or(true, |(_, best_q)| q > best_q) {
                best = Some((format, q));
            }
        }
    }
    best.map(|(format, _)| format.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn request(query: &str, accept: &str) -> ImageRequest {
        ImageRequest {
            query: query.to_string(),
            headers: NormalizedHeaders::from_pairs([("Accept", accept)]),
        }
    }

    fn config() -> EffectiveImageConfig {
        EffectiveImageConfig {
            domains: BTreeSet::from(["localhost".to_string(), "s3".to_string()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let headers = NormalizedHeaders::from_pairs([
            ("Referer", "https://a.example.com/page"),
            ("ACCEPT", "image/webp"),
            ("referer", "https://b.example.com/page"),
        ]);
        assert_eq!(headers.get("accept"), Some("image/webp"));
        assert_eq!(headers.get("Referer"), Some("https://b.example.com/page"));
    }

    #[test]
    fn test_parse_relative_url() {
        let params = ImageParams::parse(
            &request("url=%2Fpng%2Ftest.png&w=1080&q=60", "*/*"),
            &config(),
        )
        .unwrap();

        assert_eq!(params.href, "/png/test.png");
        assert!(!params.is_absolute);
        assert_eq!(params.width, 1080);
        assert_eq!(params.quality, 60);
        assert_eq!(params.mime_type, None);
        assert!(!params.is_static);
    }

    #[test]
    fn test_quality_defaults() {
        let params =
            ImageParams::parse(&request("url=/a.png&w=32", "*/*"), &config()).unwrap();
        assert_eq!(params.quality, 75);
    }

    #[test]
    fn test_static_media_is_flagged() {
        let params = ImageParams::parse(
            &request("url=/_next/static/media/logo.1234.png&w=64", "*/*"),
            &config(),
        )
        .unwrap();
        assert!(params.is_static);
    }

    #[test]
    fn test_width_not_in_sizes() {
        let err = ImageParams::parse(&request("url=/a.png&w=1081&q=75", "*/*"), &config())
            .unwrap_err();
        assert_eq!(err, ParamError::WidthNotAllowed(1081));
        assert_eq!(
            err.to_string(),
            "\"w\" parameter (width) of 1081 is not allowed"
        );
    }

    #[test]
    fn test_custom_image_size_is_allowed() {
        let config = EffectiveImageConfig {
            image_sizes: vec![33],
            ..config()
        };
        assert!(ImageParams::parse(&request("url=/a.png&w=33", "*/*"), &config).is_ok());
        assert_eq!(
            ImageParams::parse(&request("url=/a.png&w=32", "*/*"), &config).unwrap_err(),
            ParamError::WidthNotAllowed(32)
        );
    }

    #[test]
    fn test_validation_messages() {
        let cases = [
            ("w=64", "\"url\" parameter is required"),
            ("url=/a.png&url=/b.png&w=64", "\"url\" parameter cannot be an array"),
            ("url=/a.png&w=64&w=32", "\"w\" parameter cannot be an array"),
            (
                "url=//evil.com/a.png&w=64",
                "\"url\" parameter cannot be a protocol-relative URL (//)",
            ),
            ("url=ftp://localhost/a.png&w=64", "\"url\" parameter is invalid"),
            ("url=not a url&w=64", "\"url\" parameter is invalid"),
            (
                "url=https://evil.com/a.png&w=64",
                "\"url\" parameter is not allowed",
            ),
            ("url=/a.png", "\"w\" parameter (width) is required"),
            (
                "url=/a.png&w=abc",
                "\"w\" parameter (width) must be a number greater than 0",
            ),
            (
                "url=/a.png&w=0",
                "\"w\" parameter (width) must be a number greater than 0",
            ),
            (
                "url=/a.png&w=64&q=101",
                "\"q\" parameter (quality) must be a number between 1 and 100",
            ),
            (
                "url=/a.png&w=64&q=0",
                "\"q\" parameter (quality) must be a number between 1 and 100",
            ),
        ];

        for (query, message) in cases {
            let err = ImageParams::parse(&request(query, "*/*"), &config()).unwrap_err();
            assert_eq!(err.to_string(), message, "query: {}", query);
        }
    }

    #[test]
    fn test_absolute_url_on_allowed_domain() {
        let params = ImageParams::parse(
            &request("url=http%3A%2F%2Flocalhost%3A9000%2Fbucket%2Fa.png&w=2048", "*/*"),
            &config(),
        )
        .unwrap();
        assert!(params.is_absolute);
        assert_eq!(params.href, "http://localhost:9000/bucket/a.png");
    }

    #[test]
    fn test_negotiate_format() {
        let formats = vec!["image/avif".to_string(), "image/webp".to_string()];

        assert_eq!(negotiate_format(Some("*/*"), &formats), None);
        assert_eq!(negotiate_format(None, &formats), None);
        assert_eq!(
            negotiate_format(Some("image/webp,*/*"), &formats),
            Some("image/webp".to_string())
        );
        assert_eq!(
            negotiate_format(Some("image/avif,image/webp,*/*;q=0.8"), &formats),
            Some("image/avif".to_string())
        );
        assert_eq!(
            negotiate_format(Some("image/avif;q=0.5, image/webp"), &formats),
            Some("image/webp".to_string())
        );
        assert_eq!(negotiate_format(Some("image/webp;q=0"), &formats), None);
    }
}
