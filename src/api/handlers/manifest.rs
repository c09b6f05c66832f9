//! Manifest/content endpoint

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use tracing::{debug, instrument, warn};

use super::{passthrough_response, relay_base, RelayQuery};
use crate::api::server::AppState;
use crate::api::validate::validate_target;
use crate::error::{RelayError, Result};
use crate::manifest::{is_manifest, RelayLinks};
use crate::proxy::{FetchBody, FetchOutcome, FetchRequest};

const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const MANIFEST_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";

/// `GET /?src=&origin=`: fetch a playlist (or any resource) and rewrite playlists
///
/// `origin` is set on nested playlist links and keeps the whole playlist
/// tree on the top-level manifest's sticky session.
#[instrument(skip_all)]
pub async fn relay_manifest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RelayQuery>,
) -> Result<Response> {
    let target = validate_target(
        query.src.as_deref(),
        state.config.server.block_private_targets,
    )?;
    let url = target.to_string();
    let session_key = query.origin().unwrap_or(url.as_str()).to_string();

    let outcome = state
        .fetcher
        .fetch(
            FetchRequest::buffered(url.as_str())
                .with_session_key(session_key.as_str())
                .with_jitter(true),
        )
        .await?;

    if !(outcome.status.is_success() && is_manifest(outcome.content_type(), &url)) {
        return passthrough_response(outcome, "public, max-age=3600");
    }

    let FetchOutcome {
        status,
        headers: upstream_headers,
        body,
        attempts,
    } = outcome;
    let body = match body {
        FetchBody::Buffered(bytes) => bytes,
        FetchBody::Streaming(_) => {
            return Err(RelayError::Internal(
                "manifest fetched as a stream".to_string(),
            ))
        }
    };

    let links = RelayLinks::new(relay_base(&state.config, &headers), session_key);
    match state.rewriter.rewrite_bytes(&body, &url, &links) {
        Ok(rewritten) => {
            debug!("Rewrote manifest from {}", target.host_str().unwrap_or_default());
            manifest_response(status, rewritten)
        }
        Err(e) => {
            warn!("Serving manifest unmodified: {}", e);
            let original = FetchOutcome {
                status,
                headers: upstream_headers,
                body: FetchBody::Buffered(body),
                attempts,
            };
            passthrough_response(original, MANIFEST_CACHE_CONTROL)
        }
    }
}

fn manifest_response(status: StatusCode, body: Vec<u8>) -> Result<Response> {
    let response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, MANIFEST_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, MANIFEST_CACHE_CONTROL)
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .body(Body::from(body))?;
    Ok(response)
}
