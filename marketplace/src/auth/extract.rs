use super::IdentityGateway;
use crate::types::Caller;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use inkmatch_web::AppError;
use std::sync::Arc;

/// The caller resolved from `Authorization: Bearer <token>`.
///
/// Rejects with 401 when the header is missing, malformed, or names an
/// unknown token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedCaller(pub Caller);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedCaller
where
    S: Send + Sync,
    Arc<dyn IdentityGateway>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;
        let gateway = Arc::<dyn IdentityGateway>::from_ref(state);
        let caller = gateway
            .resolve(token)
            .await
            .ok_or_else(|| AppError::unauthorized("Invalid or expired token"))?;
        tracing::Span::current().record("user_id", tracing::field::display(caller.user_id));
        Ok(Self(caller))
    }
}
