/// Header value for build-time assets: cache for ten years, never revalidate
pub const IMMUTABLE: &str = "public, max-age=315360000, immutable";

/// Seconds the origin allows its response to be cached.
///
/// `s-maxage` wins over `max-age` since this is a shared cache. Missing or
/// malformed directives count as 0.
pub fn max_age(cache_control: Option<&str>) -> u64 {
    let Some(header) = cache_control else {
        return 0;
    };

    let mut max_age = None;
    let mut s_maxage = None;
    for directive in header.split(',') {
        let mut parts = directive.splitn(2, '=');
        let name = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let value = parts
            .next()
            .map(|v| v.trim().trim_matches('"'))
            .and_then(|v| v.parse::<u64>().ok());
        match name.as_str() {
            "s-maxage" => s_maxage = value,
            "max-age" => max_age = value,
            _ => {}
        }
    }

    s_maxage.or(max_age).unwrap_or(0)
}

/// `Cache-Control` for a successful response
pub fn response_header(is_static: bool, minimum_ttl: u64, max_age: u64) -> String {
    if is_static {
        return IMMUTABLE.to_string();
    }
    format!("public, max-age={}", minimum_ttl.max(max_age))
}
