// src/core/probes/headers.rs

use reqwest::header::HeaderMap;
use tracing::debug;

/// Response headers whose absence is reported as a weakness.
pub const SECURITY_HEADERS: &[&str] = &[
    "Strict-Transport-Security",
    "Content-Security-Policy",
    "X-Frame-Options",
    "X-XSS-Protection",
    "X-Content-Type-Options",
];

/// The entries of `SECURITY_HEADERS` that `headers` does not carry, in list order.
/// `HeaderMap` lookups are case-insensitive.
pub fn missing_security_headers(headers: &HeaderMap) -> Vec<String> {
    SECURITY_HEADERS
        .iter()
        .filter(|name| {
            let present = headers.contains_key(**name);
            debug!(header_name = **name, present, "Checked security header.");
            !present
        })
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn every_header_missing_on_bare_response() {
        assert_eq!(missing_security_headers(&HeaderMap::new()).len(), SECURITY_HEADERS.len());
    }

    #[test]
    fn present_headers_are_not_reported() {
        let mut headers = HeaderMap::new();
        headers.insert("strict-transport-security", HeaderValue::from_static("max-age=63072000"));
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
        headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));

        assert_eq!(
            missing_security_headers(&headers),
            vec!["Content-Security-Policy", "X-XSS-Protection"]
        );
    }
}
