//! Admission middleware for axum routers.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

use super::extract::{client_key, KeySource};
use crate::ratelimit::{CounterStore, Decision};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const THROTTLED_MESSAGE: &str = "Too many requests. Please try again later.";
const FAULT_MESSAGE: &str = "Rate limiter error";

/// What the middleware needs per request: the shared store and how to
/// identify callers. Cheap to clone.
#[derive(Clone)]
pub struct AdmissionState {
    store: Arc<CounterStore>,
    key_source: KeySource,
}

impl AdmissionState {
    pub fn new(store: Arc<CounterStore>, key_source: KeySource) -> Self {
        Self { store, key_source }
    }

    pub fn store(&self) -> &Arc<CounterStore> {
        &self.store
    }
}

#[derive(Debug, Serialize)]
struct FailureBody {
    success: bool,
    message: &'static str,
}

/// Wrap every route of `router` with the admission check.
pub fn with_admission(router: Router, state: AdmissionState) -> Router {
    router.layer(from_fn_with_state(state, admission))
}

/// Check the caller's quota before running the rest of the pipeline.
///
/// Admitted requests are forwarded unchanged and the quota headers are
/// added to whatever the handler returns. Denied requests get a 429 and
/// never reach the handler. A store fault denies the request with a 500.
pub async fn admission(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request, &state.key_source);

    let decision = match state.store.record_and_check(&key) {
        Ok(decision) => decision,
        Err(e) => {
            error!(key = %key, error = %e, "Admission check failed, denying request");
            return failure(StatusCode::INTERNAL_SERVER_ERROR, FAULT_MESSAGE).into_response();
        }
    };

    if !decision.allowed {
        debug!(
            key = %key,
            limit = decision.limit,
            reset_at = %decision.reset_at,
            "Rate limit exceeded"
        );
        let mut response = failure(StatusCode::TOO_MANY_REQUESTS, THROTTLED_MESSAGE).into_response();
        let headers = response.headers_mut();
        insert_quota_headers(headers, &decision);
        headers.insert(
            header::RETRY_AFTER,
            HeaderValue::from(decision.retry_after(state.store.now())),
        );
        return response;
    }

    let mut response = next.run(request).await;
    insert_quota_headers(response.headers_mut(), &decision);
    response
}

fn failure(status: StatusCode, message: &'static str) -> (StatusCode, Json<FailureBody>) {
    (
        status,
        Json(FailureBody {
            success: false,
            message,
        }),
    )
}

/// Quota headers as plain decimal text.
fn insert_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_timestamp()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{ClientKey, Policy};
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::routing::get;
    use chrono::DateTime;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_admission_records_against_shared_store() {
        let policy = Policy::new(2, Duration::from_secs(60)).unwrap();
        let state = AdmissionState::new(Arc::new(CounterStore::new(policy)), KeySource::PeerAddr);
        let router = with_admission(Router::new().route("/", get(|| async { "ok" })), state.clone());

        for _ in 0..3 {
            let mut request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
            let addr: SocketAddr = "192.0.2.44:5000".parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
            router.clone().oneshot(request).await.unwrap();
        }

        let key = ClientKey::from("192.0.2.44");
        assert_eq!(state.store().count_for(&key), Some(3));
        assert_eq!(state.store().len(), 1);
    }

    #[test]
    fn test_quota_headers_are_decimal() {
        let decision = Decision {
            allowed: true,
            limit: 120,
            remaining: 65,
            reset_at: DateTime::from_timestamp(1_700_000_060, 0).unwrap(),
        };
        let mut headers = HeaderMap::new();

        insert_quota_headers(&mut headers, &decision);

        assert_eq!(headers[&X_RATELIMIT_LIMIT], "120");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "65");
        assert_eq!(headers[&X_RATELIMIT_RESET], "1700000060");
    }
}
