//! Request pipeline (C7, spec §4.7).
//!
//! PARSE -> RESOLVE -> FINGERPRINT -> CACHE_LOOKUP -> [hit: stream out |
//! miss: single-flight acquire -> transform -> cache write -> stream out].
//! This module owns the axum handler that wires the stages together; each
//! stage itself lives in its own module (resolver, params, fingerprint,
//! cache, singleflight, pool, transform).

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::FutureExt;

use crate::error::ServerError;
use crate::fingerprint::Fingerprint;
use crate::metrics::METRICS;
use crate::params::{ImageQuery, TransformParams};
use crate::resolver::FallbackKind;
use crate::singleflight::{run_coalesced, Role};
use crate::AppState;

const X_CACHE: &str = "x-cache";
const X_RESOLVED_FALLBACK: &str = "x-resolved-fallback";

/// `GET /img/*path/<WxH>/<format>?quality=N`
///
/// `path_parts` is the full wildcard tail; the last one or two segments are
/// interpreted as the `<WxH>` and `<format>` transform-param segments if
/// they parse as such, and the remainder is the request path handed to the
/// resolver (spec §4.2/§4.7).
pub async fn serve_image(
    State(state): State<Arc<AppState>>,
    AxumPath(path_tail): AxumPath<String>,
    Query(query): Query<ImageQuery>,
) -> Response {
    let (request_path, dims_segment, format_segment) = split_tail(&path_tail);

    // Traversal is rejected by falling back to the system default, never by
    // failing the request (spec §4.1 step 1, §8 property 2, S4).
    let resolved = state.resolver.resolve(&request_path);

    let params =
        TransformParams::from_request(dims_segment, format_segment, query.parsed_quality());
    let fp = Fingerprint::compute(&resolved.canonical_path, &params);

    let lookup = state.cache.lookup(&fp, params.format).await;
    if lookup.present {
        METRICS.record_cache_hit();
        return match state.cache.read(&fp, params.format).await {
            Ok(bytes) => image_response(bytes, &params, &resolved.fallback_kind, "hit"),
            Err(_) => {
                // Entry vanished between lookup and read (e.g. raced with a
                // clear); fall through to a fresh transform below.
                produce_and_respond(state, fp, resolved, params).await
            }
        };
    }

    METRICS.record_cache_miss();
    produce_and_respond(state, fp, resolved, params).await
}

async fn produce_and_respond(
    state: Arc<AppState>,
    fp: Fingerprint,
    resolved: crate::resolver::ResolvedSource,
    params: TransformParams,
) -> Response {
    let canonical_path = resolved.canonical_path.clone();
    let fallback_kind = resolved.fallback_kind;
    let pool = state.pool.clone();
    let cache = state.cache.clone();

    let (outcome, role) = run_coalesced(&state.single_flight, fp.clone(), move || {
        let canonical_path = canonical_path.clone();
        let pool = pool.clone();
        let cache = cache.clone();
        let fp = fp.clone();
        let params = params;
        async move {
            let source_bytes = tokio::fs::read(&canonical_path)
                .await
                .map_err(|e| ServerError::CorruptedSource(e.to_string()))?;

            let width = params.width;
            let height = params.height;
            let format = params.format;
            let quality = params.quality;
            let encoded = pool
                .run(move || {
                    crate::transform::run_transform(&source_bytes, width, height, format, quality)
                })
                .await?;

            let encoded = Arc::new(encoded);
            if let Err(e) = cache
                .write(&fp, format, &encoded, &canonical_path)
                .await
            {
                tracing::warn!(error = %e, "failed to persist transform to cache");
            }
            Ok(encoded)
        }
        .boxed()
    })
    .await;

    METRICS.record_transform();
    if role == Role::Follower {
        METRICS.record_coalesced_wait();
    }
    let cache_status = if role == Role::Leader { "miss" } else { "coalesced" };
    match outcome {
        Ok(bytes) => image_response((*bytes).clone(), &params, &fallback_kind, cache_status),
        Err(err) => {
            METRICS.record_error();
            err.into_response()
        }
    }
}

fn image_response(
    bytes: Vec<u8>,
    params: &TransformParams,
    fallback_kind: &FallbackKind,
    cache_status: &'static str,
) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static(params.format.content_type()),
    );
    headers.insert(X_CACHE, HeaderValue::from_static(cache_status));
    if let Ok(value) = HeaderValue::from_str(fallback_kind.as_str()) {
        headers.insert(X_RESOLVED_FALLBACK, value);
    }
    (StatusCode::OK, headers, Body::from(bytes)).into_response()
}

/// Split the wildcard path tail into (request_path, dims_segment,
/// format_segment). The `<WxH>` segment is recognized as a segment
/// containing exactly one `x` with both sides numeric; the segment after it
/// is the format (if one of the known formats). Everything before that is
/// the request path handed to the resolver.
fn split_tail(tail: &str) -> (String, Option<&str>, Option<&str>) {
    let segments: Vec<&str> = tail.split('/').filter(|s| !s.is_empty()).collect();

    let dims_idx = segments.iter().position(|s| is_dims_segment(s));
    let Some(dims_idx) = dims_idx else {
        return (tail.trim_matches('/').to_string(), None, None);
    };

    let request_path = segments[..dims_idx].join("/");
    let dims_segment = segments[dims_idx];
    let format_segment = segments.get(dims_idx + 1).copied();
    (request_path, Some(dims_segment), format_segment)
}

fn is_dims_segment(segment: &str) -> bool {
    match segment.split_once('x') {
        Some((w, h)) => !w.is_empty() && !h.is_empty() && w.chars().all(|c| c.is_ascii_digit()) && h.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_path_with_dims_and_format() {
        let (path, dims, fmt) = split_tail("cats/fluffy/400x300/webp");
        assert_eq!(path, "cats/fluffy");
        assert_eq!(dims, Some("400x300"));
        assert_eq!(fmt, Some("webp"));
    }

    #[test]
    fn splits_path_with_only_dims() {
        let (path, dims, fmt) = split_tail("cat.jpg/100x100");
        assert_eq!(path, "cat.jpg");
        assert_eq!(dims, Some("100x100"));
        assert_eq!(fmt, None);
    }

    #[test]
    fn plain_path_has_no_dims_or_format() {
        let (path, dims, fmt) = split_tail("cat.jpg");
        assert_eq!(path, "cat.jpg");
        assert_eq!(dims, None);
        assert_eq!(fmt, None);
    }
}
