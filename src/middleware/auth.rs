use std::convert::Infallible;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::auth::validate_jwt;
use crate::config::{Route, RouteAccess};
use crate::error::ApiError;
use crate::types::Caller;

/// Resolves the bearer token, when identity is enabled and one is sent, into a [`Caller`]
/// request extension. A token that is present but invalid is rejected outright.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(secret) = state.jwt_secret() {
        if let Some(token) = extract_jwt_from_headers(request.headers()).map_err(ApiError::unauthorized)? {
            let claims = validate_jwt(&token, secret).map_err(|e| ApiError::unauthorized(e.to_string()))?;
            request.extensions_mut().insert(Caller::from(claims));
        }
    }
    Ok(next.run(request).await)
}

/// Bearer token from the Authorization header; `None` when the header is absent
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<Option<String>, String> {
    let Some(auth_header) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if token.trim().is_empty() => Err("Empty JWT token".to_string()),
        Some(token) => Ok(Some(token.trim().to_string())),
        None => Err("Authorization header must use Bearer token format".to_string()),
    }
}

/// The caller resolved by [`identity_middleware`], if any
#[derive(Debug, Clone)]
pub struct CurrentCaller(pub Option<Caller>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentCaller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentCaller(parts.extensions.get::<Caller>().cloned()))
    }
}

/// Enforce a route's access level. Only applies when identity is enabled.
pub fn require_access(state: &AppState, route: Route, caller: Option<&Caller>) -> Result<(), ApiError> {
    if state.jwt_secret().is_none() {
        return Ok(());
    }
    match (state.routes().get(route).access, caller) {
        (RouteAccess::Public, _) => Ok(()),
        (_, None) => Err(ApiError::unauthorized("Authentication required")),
        (RouteAccess::Superuser, Some(caller)) if !caller.superuser => {
            Err(ApiError::forbidden("Superuser privileges required"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn extracts_bearer_tokens() {
        assert_eq!(extract_jwt_from_headers(&HeaderMap::new()), Ok(None));
        assert_eq!(extract_jwt_from_headers(&headers("Bearer abc")), Ok(Some("abc".to_string())));
        assert!(extract_jwt_from_headers(&headers("Bearer  ")).is_err());
        assert!(extract_jwt_from_headers(&headers("Basic abc")).is_err());
    }
}
