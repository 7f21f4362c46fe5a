//! Per-request context propagation.
//!
//! The request id assigned by the `SetRequestIdLayer` is scoped into a
//! task-local so the response envelope (including error responses built deep
//! in `IntoResponse`) can echo it without threading it through every
//! signature.

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Header carrying the request id (set by the request-id layer).
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The current request id, when running inside a request scope.
#[must_use]
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

/// Middleware scoping handler execution with the request id task-local.
pub async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    match request_id {
        Some(id) => REQUEST_ID.scope(id, next.run(request)).await,
        None => next.run(request).await,
    }
}

/// Default inbound request deadline, in seconds.
pub const DEFAULT_REQUEST_DEADLINE_SECS: u64 = 30;

/// Middleware enforcing the inbound request deadline.
///
/// A handler that outlives the deadline is abandoned; side effects already
/// issued (a completed code exchange, a persisted token) are not rolled back.
pub async fn request_deadline_middleware(request: Request<Body>, next: Next) -> Response {
    match tokio::time::timeout(
        std::time::Duration::from_secs(DEFAULT_REQUEST_DEADLINE_SECS),
        next.run(request),
    )
    .await
    {
        Ok(response) => response,
        Err(_) => {
            tracing::error!(
                target: "api",
                request_id = current_request_id().unwrap_or_default(),
                "Request deadline exceeded"
            );
            crate::error::ApiError(linkhub_core::BrokerError::internal(
                "request deadline exceeded",
            ))
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_request_id_visible_inside_handler() {
        let app = Router::new()
            .route(
                "/probe",
                get(|| async { current_request_id().unwrap_or_default() }),
            )
            .layer(middleware::from_fn(request_context_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/probe")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"req-42");
    }

    #[test]
    fn test_no_scope_yields_none() {
        assert!(current_request_id().is_none());
    }
}
