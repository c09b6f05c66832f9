//! Segment endpoint

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use tracing::instrument;

use super::{passthrough_response, RelayQuery};
use crate::api::server::AppState;
use crate::api::validate::validate_target;
use crate::error::Result;
use crate::proxy::FetchRequest;

/// Build the streaming fetch for `/seg` and `/asset`
///
/// The manifest hint keys the sticky session and doubles as Referer.
pub(crate) fn streaming_request(
    state: &AppState,
    headers: &HeaderMap,
    query: &RelayQuery,
) -> Result<FetchRequest> {
    let target = validate_target(
        query.src.as_deref(),
        state.config.server.block_private_targets,
    )?;
    let url = target.to_string();
    let origin = query.origin().map(str::to_string);

    Ok(FetchRequest::streaming(url.as_str())
        .with_session_key(origin.clone().unwrap_or(url))
        .with_referer(origin)
        .with_range(headers.get(header::RANGE).cloned()))
}

/// `GET /seg?src=&origin=`: stream a segment through the relay
#[instrument(skip_all)]
pub async fn relay_segment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RelayQuery>,
) -> Result<Response> {
    let request = streaming_request(&state, &headers, &query)?;
    let outcome = state.fetcher.fetch(request).await?;
    passthrough_response(outcome, "public, max-age=86400")
}
