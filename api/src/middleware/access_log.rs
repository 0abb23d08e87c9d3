use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service, ServiceExt};
use uuid::Uuid;

use crate::extract::USER_HEADER;

/// Tower Layer for access logging.
///
/// Emits one `access` tracing event per `/v1/` request with method, path,
/// status, latency, user and the session the path addresses. Never touches
/// the response.
#[derive(Clone, Default)]
pub struct AccessLogLayer;

impl AccessLogLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService { inner }
    }
}

#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
}

impl<S> Service<Request> for AccessLogService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);

        Box::pin(async move {
            let path = req.uri().path().to_owned();

            // Only log API endpoints
            if !path.starts_with("/v1/") {
                return Ok(ready.oneshot(req).await.into_response());
            }

            let start = Instant::now();
            let method = req.method().to_string();
            let user = req
                .headers()
                .get(USER_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("local")
                .to_owned();

            let response = ready.oneshot(req).await.into_response();

            let latency_ms = start.elapsed().as_millis() as u64;
            let status = response.status().as_u16();
            let session_id = session_from_path(&path);

            if response.status().is_server_error() {
                tracing::warn!(
                    target: "access",
                    %method, %path, status, latency_ms, %user,
                    session_id = session_id.map(|id| id.to_string()),
                    "request failed"
                );
            } else {
                tracing::info!(
                    target: "access",
                    %method, %path, status, latency_ms, %user,
                    session_id = session_id.map(|id| id.to_string()),
                    "request served"
                );
            }

            Ok(response)
        })
    }
}

/// Session id from `/v1/sessions/{id}/...`.
fn session_from_path(path: &str) -> Option<Uuid> {
    let rest = path.strip_prefix("/v1/sessions/")?;
    let segment = rest.split('/').next()?;
    Uuid::parse_str(segment).ok()
}
