//! Access log for the line. Kept apart from `tracing` so plant IT can ship
//! one line per request to their collector without the span noise.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use slog::{o, Drain, Logger};
use slog_async::Async;
use slog_term::{FullFormat, PlainDecorator, TermDecorator};
use std::sync::Arc;
use std::time::Instant;

/// Configuration for setting up the logger
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    async_buffer_size: usize,
    use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            async_buffer_size: 1024,
            use_color: true,
        }
    }
}

impl LoggerConfig {
    /// Colorless output, for JSON deployments and log files
    pub fn plain() -> Self {
        Self {
            use_color: false,
            ..Self::default()
        }
    }
}

/// Sets up the access logger
pub fn setup_logger(config: LoggerConfig) -> Logger {
    let decorator = {
        let builder = TermDecorator::new();
        let builder = if config.use_color {
            builder.force_color()
        } else {
            builder
        };
        builder.build()
    };

    let drain = FullFormat::new(decorator).build().fuse();

    let drain = Async::new(drain)
        .chan_size(config.async_buffer_size)
        .build()
        .fuse();

    Logger::root(
        drain,
        o!("version" => env!("CARGO_PKG_VERSION"), "component" => "access"),
    )
}

/// Logger that writes nowhere; used by tests and tools
pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// Logger over any writer, without the async stage
pub fn plain_logger<W: std::io::Write + Send + 'static>(writer: W) -> Logger {
    let decorator = PlainDecorator::new(writer);
    let drain = std::sync::Mutex::new(FullFormat::new(decorator).build()).fuse();
    Logger::root(drain, o!("component" => "access"))
}

/// State struct for the access log middleware
#[derive(Clone)]
pub struct AccessLogState {
    logger: Logger,
}

impl AccessLogState {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

/// One line per request: method, path, status, operator and duration
pub async fn access_log_middleware(
    State(state): State<Arc<AccessLogState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start_time = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let operator = req
        .headers()
        .get(crate::auth::OPERATOR_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let request_id = crate::tracing::current_request_id()
        .map(|rid| rid.to_string())
        .unwrap_or_else(|| "-".to_string());

    let response = next.run(req).await;
    let status = response.status().as_u16();
    let duration_ms = start_time.elapsed().as_millis() as u64;

    if status >= 500 {
        slog::error!(
            &state.logger,
            "HTTP request failed";
            "method" => method,
            "path" => path,
            "status" => status,
            "operator" => operator,
            "request_id" => request_id,
            "duration_ms" => duration_ms,
        );
    } else {
        slog::info!(
            &state.logger,
            "HTTP request handled";
            "method" => method,
            "path" => path,
            "status" => status,
            "operator" => operator,
            "request_id" => request_id,
            "duration_ms" => duration_ms,
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use std::io;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn logs_operator_and_status() {
        let buf = SharedBuf::default();
        let state = Arc::new(AccessLogState::new(plain_logger(buf.clone())));
        let app = Router::new()
            .route("/scan", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                state,
                access_log_middleware,
            ));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/scan")
                    .header(crate::auth::OPERATOR_ID_HEADER, "u-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let line = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(line.contains("HTTP request handled"));
        assert!(line.contains("operator: u-42"));
        assert!(line.contains("status: 200"));
    }
}
