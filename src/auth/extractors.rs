use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tower_cookies::Cookies;
use tracing::warn;

use super::{handlers::ACCESS_COOKIE, jwt::JwtKeys, repo_types::User};
use crate::{error::ApiError, state::AppState};

/// The authenticated caller, loaded from the store.
///
/// The access token is read from the `accessToken` cookie, falling back to an
/// `Authorization: Bearer` header.
pub struct CurrentUser(pub User);

fn bearer(parts: &Parts) -> Option<String> {
    let auth = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(|t| t.trim().to_string())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let from_cookie = match Cookies::from_request_parts(parts, state).await {
            Ok(cookies) => cookies.get(ACCESS_COOKIE).map(|c| c.value().to_string()),
            Err(_) => None,
        };
        let token = from_cookie
            .filter(|t| !t.is_empty())
            .or_else(|| bearer(parts))
            .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

        let claims = JwtKeys::from_ref(state).verify_access(&token).map_err(|e| {
            warn!(error = %e, "invalid or expired access token");
            ApiError::unauthorized("Invalid access token")
        })?;

        let user = state
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid access token"))?;

        Ok(CurrentUser(user))
    }
}
