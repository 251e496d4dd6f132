//! Quota enforcement middleware.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, warn};

use super::service::AppState;

pub const RATELIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATELIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATELIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Body returned with a `429` response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub code: &'static str,
    pub retry_after_secs: u64,
}

/// Consume one operation for the calling client and reject the request once
/// its budget for the current time slice is spent.
///
/// Every response carries the limit, the remaining budget (never below zero)
/// and the seconds until the slice resets.
pub async fn enforce_quota(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let id = state.namer.name(&peer.to_string(), request.headers());
    let quota = state.limiter.consume_status(&id);
    let remaining = quota.remaining;
    let reset_secs = ceil_secs(quota.reset_in);

    let mut response = if remaining >= 0 {
        debug!(
            id = %id,
            path = %request.uri().path(),
            remaining = remaining,
            "Request allowed"
        );
        next.run(request).await
    } else {
        warn!(
            id = %id,
            path = %request.uri().path(),
            over_by = -remaining,
            retry_after_secs = reset_secs,
            "Request rate limited"
        );
        let mut limited = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: "time slice budget exhausted",
                code: "RATE_LIMITED",
                retry_after_secs: reset_secs,
            }),
        )
            .into_response();
        limited
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(reset_secs));
        limited
    };

    write_quota_headers(response.headers_mut(), quota.limit, remaining, reset_secs);
    response
}

fn write_quota_headers(headers: &mut HeaderMap, limit: i64, remaining: i64, reset_secs: u64) {
    headers.insert(RATELIMIT_LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(RATELIMIT_REMAINING_HEADER, HeaderValue::from(remaining.max(0)));
    headers.insert(RATELIMIT_RESET_HEADER, HeaderValue::from(reset_secs));
}

/// Whole seconds, rounded up so clients never retry early.
fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
        assert_eq!(ceil_secs(Duration::from_millis(2001)), 3);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
    }

    #[test]
    fn test_remaining_header_is_clamped() {
        let mut headers = HeaderMap::new();
        write_quota_headers(&mut headers, 5, -3, 10);

        assert_eq!(headers[RATELIMIT_LIMIT_HEADER], "5");
        assert_eq!(headers[RATELIMIT_REMAINING_HEADER], "0");
        assert_eq!(headers[RATELIMIT_RESET_HEADER], "10");
    }
}
