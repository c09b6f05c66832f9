//! Relay request handlers

pub mod asset;
pub mod health;
pub mod manifest;
pub mod segment;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use serde::Deserialize;

use crate::config::Config;
use crate::error::Result;
use crate::proxy::{FetchBody, FetchOutcome};

/// Query parameters shared by the relay endpoints
#[derive(Debug, Default, Deserialize)]
pub struct RelayQuery {
    /// Absolute target URL
    pub src: Option<String>,
    /// Manifest the target was listed in; used as the sticky session key
    pub origin: Option<String>,
}

impl RelayQuery {
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref().map(str::trim).filter(|o| !o.is_empty())
    }
}

/// Base URL clients use to reach the relay
///
/// The configured public URL wins; otherwise it is rebuilt from the
/// forwarding headers and `Host`.
pub fn relay_base(config: &Config, headers: &HeaderMap) -> String {
    if let Some(public) = &config.server.public_url {
        return public.clone();
    }

    let first = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let proto = first("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = first("x-forwarded-host")
        .or_else(|| first(header::HOST.as_str()))
        .unwrap_or_else(|| config.listen_addr());

    format!("{}://{}", proto, host)
}

/// Headers copied from a streamed upstream response
const PASSTHROUGH_HEADERS: [HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
];

/// Turn a fetched body into a response, forwarding ranged-delivery headers
pub(crate) fn passthrough_response(outcome: FetchOutcome, cache_control: &'static str) -> Result<Response> {
    let mut builder = Response::builder()
        .status(outcome.status)
        .header(header::CACHE_CONTROL, cache_control);

    for name in PASSTHROUGH_HEADERS {
        if let Some(value) = outcome.headers.get(&name) {
            builder = builder.header(name, value);
        }
    }
    if !outcome.headers.contains_key(header::CONTENT_TYPE) {
        builder = builder.header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
    }

    let body = match outcome.body {
        FetchBody::Buffered(bytes) => Body::from(bytes),
        FetchBody::Streaming(stream) => Body::from_stream(stream),
    };
    Ok(builder.body(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, v.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_relay_base_prefers_public_url() {
        let mut config = Config::default();
        config.server.public_url = Some("https://relay.example".to_string());
        assert_eq!(
            relay_base(&config, &headers(&[("host", "internal:5000")])),
            "https://relay.example"
        );
    }

    #[test]
    fn test_relay_base_from_forwarding_headers() {
        let config = Config::default();
        assert_eq!(
            relay_base(
                &config,
                &headers(&[
                    ("x-forwarded-proto", "https, http"),
                    ("host", "relay.example")
                ])
            ),
            "https://relay.example"
        );
        assert_eq!(
            relay_base(&config, &headers(&[("host", "10.0.0.5:5000")])),
            "http://10.0.0.5:5000"
        );
        assert_eq!(relay_base(&config, &HeaderMap::new()), "http://0.0.0.0:5000");
    }

    #[test]
    fn test_query_origin_ignores_blank() {
        let query = RelayQuery {
            src: None,
            origin: Some("  ".to_string()),
        };
        assert_eq!(query.origin(), None);
    }
}
