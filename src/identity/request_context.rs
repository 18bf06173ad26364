use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::error::{AppError, AppResult};

use super::principal::Identity;
use super::provider::UserStore;
use super::session::TokenService;

/// Per-request authentication result, stored in request extensions by the auth middleware.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub identity: Identity,
    pub request_id: String,
}

/// `Authorization: Bearer <token>`; the scheme is matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Validate the bearer token and attach the user's current override map.
///
/// A token whose subject no longer exists or is deactivated is rejected like any other
/// invalid token.
pub fn authenticate(tokens: &TokenService, users: &dyn UserStore, headers: &HeaderMap) -> AppResult<RequestContext> {
    let Some(token) = bearer_token(headers) else {
        return Err(AppError::auth("missing_token", "missing bearer token"));
    };
    let identity = match tokens.validate(token) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::debug!(target: "auth", state = ?tokens.inspect(token), "bearer token rejected");
            return Err(e.into());
        }
    };
    let user = match users.find_by_id(identity.subject_id) {
        Some(u) if u.active => u,
        _ => {
            tracing::debug!(target: "auth", subject = identity.subject_id, "token subject unknown or inactive");
            return Err(AppError::auth("invalid_token", "invalid or expired token"));
        }
    };
    Ok(RequestContext {
        identity: identity.with_overrides(user.permissions),
        request_id: uuid::Uuid::new_v4().to_string(),
    })
}
