//! Request correlation.
//!
//! Every request carries a correlation id, taken from the `X-Correlation-ID`
//! header or generated when absent. [`propagate_correlation_id`] stores it in
//! the request extensions, runs the rest of the stack inside an
//! `http_request` span, and echoes the id back on the response.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use std::fmt;
use tracing::Instrument;
use uuid::Uuid;

/// Correlation ID header name.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Correlation ID for request tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Read the id from headers, falling back to a fresh v4 id when the
    /// header is missing or not a UUID.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let id = headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value).ok())
            .unwrap_or_else(Uuid::new_v4);
        Self(id)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Prefer the id assigned by the middleware so logs and the response agree.
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }
        Ok(Self::from_headers(&parts.headers))
    }
}

/// Middleware function assigning and propagating the correlation id.
///
/// Install with `axum::middleware::from_fn(propagate_correlation_id)`.
pub async fn propagate_correlation_id(mut request: Request, next: Next) -> Response {
    let correlation_id = CorrelationId::from_headers(request.headers());
    request.extensions_mut().insert(correlation_id);

    let span = tracing::info_span!(
        "http_request",
        correlation_id = %correlation_id,
        method = %request.method(),
        path = %request.uri().path(),
        user_id = tracing::field::Empty,
    );

    let mut response = next.run(request).instrument(span.clone()).await;
    span.in_scope(|| tracing::debug!(status = response.status().as_u16(), "Request completed"));

    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    async fn echo(correlation_id: CorrelationId) -> String {
        correlation_id.to_string()
    }

    fn app() -> Router {
        Router::new()
            .route("/echo", get(echo))
            .layer(axum::middleware::from_fn(propagate_correlation_id))
    }

    #[tokio::test]
    async fn test_existing_id_is_preserved() {
        let id = Uuid::new_v4();
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/echo")
                    .header(CORRELATION_ID_HEADER, id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CORRELATION_ID_HEADER).unwrap(),
            id.to_string().as_str()
        );
    }

    #[tokio::test]
    async fn test_missing_id_is_generated_and_matches_handler() {
        let response = app()
            .oneshot(Request::builder().uri("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(Uuid::parse_str(&header).is_ok());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(body.to_vec()).unwrap(), header);
    }

    #[test]
    fn test_garbage_header_is_replaced() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        let id = CorrelationId::from_headers(&headers);
        assert_ne!(id.0, Uuid::nil());
    }
}
