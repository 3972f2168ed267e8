//! The pieces of the routing state machine shared by both transport
//! variants: response classification, request retargeting, and the
//! synthesized 429.

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};

use crate::backend::Backend;
use crate::error::{Result, SpillwayError};
use crate::registry::Registry;

/// Applied when a throttled response carries no usable delay header, and as
/// the `Retry-After` sentinel for a pool with nothing left to wait on.
pub(crate) const DEFAULT_RETRY_AFTER_SECS: u64 = 10;

const API_KEY_HEADER: HeaderName = HeaderName::from_static("api-key");

/// What one upstream response means for the retry loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// 2xx: count the success and hand the response back untouched.
    Success,
    /// 429 or a retriable 5xx: take the backend out of the pool and retry.
    Throttled { retry_after_seconds: u64 },
    /// Everything else is the caller's problem, verbatim.
    PassThrough,
}

pub(crate) fn classify(status: StatusCode, headers: &HeaderMap) -> Disposition {
    match status.as_u16() {
        200..=299 => Disposition::Success,
        429 | 500 | 502 | 503 | 504 => Disposition::Throttled {
            retry_after_seconds: parse_retry_after(headers).unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        _ => Disposition::PassThrough,
    }
}

/// Integer-seconds `Retry-After`, with the rate-limit reset header some
/// deployments send instead as a fallback. HTTP-date forms are not produced
/// by these endpoints and fall through to the default.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    [header::RETRY_AFTER.as_str(), "x-ratelimit-reset-requests"]
        .iter()
        .find_map(|name| {
            headers
                .get(*name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
        })
}

/// Logs the dispatch outcome and applies it to the registry. Returns the
/// disposition so the drive loop can decide whether to go around again.
pub(crate) fn observe(
    registry: &Registry,
    index: usize,
    status: StatusCode,
    headers: &HeaderMap,
    now_epoch_seconds: u64,
) -> Disposition {
    tracing::info!(
        host = %registry.backend(index).host,
        status = status.as_u16(),
        "request dispatched"
    );
    let disposition = classify(status, headers);
    match disposition {
        Disposition::Success => registry.record_success(index),
        Disposition::Throttled {
            retry_after_seconds,
        } => registry.mark_throttled(index, retry_after_seconds, now_epoch_seconds),
        Disposition::PassThrough => {}
    }
    disposition
}

/// Rewritten copy of an outbound URL pointed at `backend`: scheme forced to
/// `https`, host replaced, path/query untouched. Idempotent.
pub(crate) fn retarget_url(url: &Url, backend: &Backend) -> Result<Url> {
    let mut url = url.clone();
    if url.scheme() != "https" {
        url.set_scheme("https")
            .map_err(|()| rewrite_error(backend, "cannot force https scheme"))?;
    }
    url.set_host(Some(&backend.host))
        .map_err(|err| rewrite_error(backend, &err.to_string()))?;
    Ok(url)
}

/// Fresh copy of the caller's headers pointed at `backend`: `Host` replaced,
/// everything else passed through. A configured api key displaces any
/// caller-supplied `Authorization` header, since the caller cannot know
/// which backend will receive the request. Always derives from the caller's
/// original headers, never from a previous attempt's, so one backend's
/// credentials cannot leak into a retry against another. Idempotent.
pub(crate) fn retarget_headers(headers: &HeaderMap, backend: &Backend) -> Result<HeaderMap> {
    let mut headers = headers.clone();
    headers.insert(
        header::HOST,
        HeaderValue::from_str(&backend.host)
            .map_err(|err| rewrite_error(backend, &err.to_string()))?,
    );

    if let Some(api_key) = &backend.api_key {
        headers.insert(
            API_KEY_HEADER,
            HeaderValue::from_str(api_key).map_err(|err| rewrite_error(backend, &err.to_string()))?,
        );
        headers.remove(header::AUTHORIZATION);
    }

    Ok(headers)
}

fn rewrite_error(backend: &Backend, reason: &str) -> SpillwayError {
    SpillwayError::Rewrite {
        host: backend.host.clone(),
        reason: reason.to_string(),
    }
}

/// The one response this crate fabricates: every backend is throttled, so
/// tell the caller's own backoff when to come back.
pub(crate) fn exhausted_response(retry_after_seconds: u64) -> http::Response<String> {
    let mut response = http::Response::new("Too Many Requests".to_string());
    *response.status_mut() = http::StatusCode::TOO_MANY_REQUESTS;
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_seconds));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
