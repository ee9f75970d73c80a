//! URL utility functions

use url::Url;

use crate::error::{Error, Result};

/// Parse URL and extract components
pub fn parse_url(url_str: &str) -> std::result::Result<Url, url::ParseError> {
    Url::parse(url_str)
}

/// Extract the lowercased host of an absolute URL, if it has one
pub fn extract_host(url_str: &str) -> Option<String> {
    parse_url(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase()))
}

/// Check if URL is a WebSocket URL
pub fn is_websocket(url: &Url) -> bool {
    matches!(url.scheme(), "ws" | "wss")
}

/// Validate a node endpoint: absolute `http`/`https` URL with a host
pub fn validate_endpoint(endpoint: &str) -> Result<Url> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("endpoint is empty".to_string()));
    }
    let url = Url::parse(trimmed)
        .map_err(|e| Error::Validation(format!("endpoint '{}' is not an absolute URL: {}", trimmed, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Validation(format!(
            "endpoint '{}' must use http or https, got '{}'",
            trimmed,
            url.scheme()
        )));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(Error::Validation(format!("endpoint '{}' has no host", trimmed))),
    }
}

/// Validate a WebSocket endpoint: absolute `ws`/`wss` URL with a host
pub fn validate_ws_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint.trim())
        .map_err(|e| Error::Validation(format!("ws endpoint '{}' is not an absolute URL: {}", endpoint, e)))?;
    if !is_websocket(&url) || url.host_str().is_none() {
        return Err(Error::Validation(format!("ws endpoint '{}' must be ws:// or wss:// with a host", endpoint)));
    }
    Ok(url)
}

/// Canonical form of an endpoint used when deriving node ids: no trailing slash
pub fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host_lowercases() {
        assert_eq!(extract_host("https://GitHub.com/rust-lang"), Some("github.com".to_string()));
        assert_eq!(extract_host("/relative/path"), None);
    }

    #[test]
    fn test_validate_endpoint_accepts_http_and_https() {
        assert!(validate_endpoint("https://mirror.example.com").is_ok());
        assert!(validate_endpoint("http://10.0.0.1:8080/gh").is_ok());
    }

    #[test]
    fn test_validate_endpoint_rejects_malformed() {
        assert!(matches!(validate_endpoint(""), Err(Error::Validation(_))));
        assert!(matches!(validate_endpoint("mirror.example.com"), Err(Error::Validation(_))));
        assert!(matches!(validate_endpoint("ftp://mirror.example.com"), Err(Error::Validation(_))));
        assert!(matches!(validate_endpoint("https://"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_ws_endpoint() {
        assert!(validate_ws_endpoint("wss://ws.mirror.example.com").is_ok());
        assert!(validate_ws_endpoint("https://mirror.example.com").is_err());
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint(" https://ghproxy.com/ "), "https://ghproxy.com");
    }
}
