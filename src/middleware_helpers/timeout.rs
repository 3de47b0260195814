use crate::errors::ServiceError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use tracing::warn;

/// Request ceiling applied to every API call.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeout(pub Duration);

/// Fails the request with [`ServiceError::Timeout`] once the ceiling elapses.
/// Dropping the inner future drops any open transaction, which rolls it back.
/// A scan that already committed is kept and finishes its labels in the
/// background, so a timeout does not mean nothing happened.
pub async fn request_timeout_middleware(
    State(RequestTimeout(limit)): State<RequestTimeout>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(path = %path, limit_ms = limit.as_millis() as u64, "request timed out");
            metrics::counter!("battery_mes.requests.timed_out", 1);
            ServiceError::Timeout(format!(
                "request exceeded {}s; changes already committed are kept",
                limit.as_secs_f32()
            ))
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn slow_handler_yields_gateway_timeout() {
        let app = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    "late"
                }),
            )
            .route("/fast", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                RequestTimeout(Duration::from_millis(20)),
                request_timeout_middleware,
            ));

        let slow = app
            .clone()
            .oneshot(http::Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(slow.status(), StatusCode::GATEWAY_TIMEOUT);

        let fast = app
            .oneshot(http::Request::builder().uri("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(fast.status(), StatusCode::OK);
    }
}
