//! S3-shaped object routes
//!
//! `/s3/<bucket>/<object>` reuses the same LOM code paths as `/v1/objects`,
//! adding the S3 conventions: `ETag` is the payload's MD5, `Range` reads are
//! honored, DELETE answers 204.

use crate::handlers::{read_object, remove_object, stat_object, write_object, ApiError, ApiResult};
use crate::state::TargetState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use std::sync::Arc;
use strata_common::checksum::etag_md5;
use strata_common::Error;

/// Parsed `Range` header; end is inclusive
#[derive(Debug, Clone, Copy)]
struct ByteRange {
    start: u64,
    end: u64,
}

/// Parse `bytes=0-99`, `bytes=100-`, `bytes=-50`
fn parse_range_header(raw: &str, total_size: u64) -> Option<ByteRange> {
    let raw = raw.trim();
    let spec = raw.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() && end_str.is_empty() {
        return None;
    }

    // suffix range: last N bytes
    if start_str.is_empty() {
        let suffix: u64 = end_str.parse().ok()?;
        if suffix == 0 || total_size == 0 {
            return None;
        }
        let suffix = suffix.min(total_size);
        return Some(ByteRange {
            start: total_size - suffix,
            end: total_size - 1,
        });
    }

    let start: u64 = start_str.parse().ok()?;
    if start >= total_size {
        return None;
    }

    // open-ended range: from start to the end
    if end_str.is_empty() {
        return Some(ByteRange {
            start,
            end: total_size - 1,
        });
    }

    let end: u64 = end_str.parse().ok()?;
    if start > end {
        return None;
    }
    Some(ByteRange {
        start,
        end: end.min(total_size - 1),
    })
}

fn etag_of(lom: &strata_cluster::Lom, payload: &[u8]) -> String {
    lom.meta()
        .and_then(|m| m.custom.get("etag").cloned())
        .unwrap_or_else(|| etag_md5(payload))
}

pub async fn get_object(
    State(state): State<Arc<TargetState>>,
    Path((bucket, obj)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let (lom, payload) = read_object(&state, &bucket, &obj).await?;
    let etag = etag_of(&lom, &payload);

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| parse_range_header(raw, payload.len() as u64));

    let resp = match range {
        Some(r) => {
            let slice = payload[r.start as usize..=r.end as usize].to_vec();
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::ETAG, format!("\"{etag}\""))
                .header(header::CONTENT_LENGTH, slice.len())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", r.start, r.end, payload.len()),
                )
                .body(Body::from(slice))
        }
        None => Response::builder()
            .status(StatusCode::OK)
            .header(header::ETAG, format!("\"{etag}\""))
            .header(header::CONTENT_LENGTH, payload.len())
            .body(Body::from(payload)),
    };
    resp.map_err(|e| ApiError(Error::internal(e.to_string())))
}

pub async fn put_object(
    State(state): State<Arc<TargetState>>,
    Path((bucket, obj)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    let etag = etag_md5(&body);
    write_object(&state, &bucket, &obj, body, Some(etag.clone())).await?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, format!("\"{etag}\""))
        .body(Body::empty())
        .map_err(|e| ApiError(Error::internal(e.to_string())))
}

pub async fn head_object(
    State(state): State<Arc<TargetState>>,
    Path((bucket, obj)): Path<(String, String)>,
) -> ApiResult<Response> {
    let lom = stat_object(&state, &bucket, &obj).await?;
    let mut resp = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, lom.size());
    if let Some(etag) = lom.meta().and_then(|m| m.custom.get("etag")) {
        resp = resp.header(header::ETAG, format!("\"{etag}\""));
    }
    resp.body(Body::empty())
        .map_err(|e| ApiError(Error::internal(e.to_string())))
}

pub async fn delete_object(
    State(state): State<Arc<TargetState>>,
    Path((bucket, obj)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    remove_object(&state, &bucket, &obj).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_basic() {
        let r = parse_range_header("bytes=0-99", 1000).unwrap();
        assert_eq!((r.start, r.end), (0, 99));
    }

    #[test]
    fn range_open_ended() {
        let r = parse_range_header("bytes=900-", 1000).unwrap();
        assert_eq!((r.start, r.end), (900, 999));
    }

    #[test]
    fn range_suffix() {
        let r = parse_range_header("bytes=-50", 1000).unwrap();
        assert_eq!((r.start, r.end), (950, 999));
        // suffix longer than the object clamps to the whole object
        let r = parse_range_header("bytes=-5000", 1000).unwrap();
        assert_eq!((r.start, r.end), (0, 999));
    }

    #[test]
    fn range_invalid() {
        assert!(parse_range_header("bytes=", 1000).is_none());
        assert!(parse_range_header("bytes=5-2", 1000).is_none());
        assert!(parse_range_header("bytes=1000-", 1000).is_none());
        assert!(parse_range_header("items=0-10", 1000).is_none());
    }

    #[test]
    fn range_end_clamped() {
        let r = parse_range_header("bytes=990-2000", 1000).unwrap();
        assert_eq!((r.start, r.end), (990, 999));
    }
}
