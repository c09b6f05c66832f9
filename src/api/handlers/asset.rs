//! Auxiliary asset endpoint

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{instrument, warn};

use super::segment::streaming_request;
use super::{passthrough_response, RelayQuery};
use crate::api::server::AppState;
use crate::error::Result;

/// 1×1 transparent GIF
const PLACEHOLDER_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// `GET /asset?src=&origin=`: like `/seg`, but a failed fetch yields a
/// placeholder image instead of an error
#[instrument(skip_all)]
pub async fn relay_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RelayQuery>,
) -> Result<Response> {
    let request = streaming_request(&state, &headers, &query)?;

    match state.fetcher.fetch(request).await {
        Ok(outcome) => passthrough_response(outcome, "public, max-age=86400"),
        Err(e) => {
            warn!("Asset fetch failed, serving placeholder: {}", e);
            Ok(placeholder())
        }
    }
}

fn placeholder() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        PLACEHOLDER_GIF,
    )
        .into_response()
}
