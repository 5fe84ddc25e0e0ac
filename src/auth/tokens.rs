//! Refresh-token lifecycle on top of the user store.
//!
//! A user holds at most one refresh token. Issuing a pair overwrites it, so a
//! rotated token is rejected on the next refresh even while its signature and
//! expiry are still valid.

use anyhow::Context;
use axum::extract::FromRef;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{claims::RefreshClaims, jwt::JwtKeys},
    error::ApiError,
    state::AppState,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Unauthorized Request")]
    Missing,
    #[error("Invalid Or Expired Refresh Token")]
    Invalid(#[source] anyhow::Error),
    #[error("Invalid Refresh Token")]
    UnknownUser,
    #[error("Refresh token is expired or used")]
    Mismatch,
    #[error("Something went wrong while generating access and refresh tokens")]
    Internal(#[source] anyhow::Error),
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Internal(inner) => ApiError::Internal(inner.context("issue token pair")),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

/// Loads the user, signs a fresh pair and stores the new refresh token.
pub async fn issue_token_pair(st: &AppState, user_id: Uuid) -> Result<TokenPair, TokenError> {
    let user = st
        .users
        .find_by_id(user_id)
        .await
        .context("load user")
        .map_err(TokenError::Internal)?
        .ok_or_else(|| TokenError::Internal(anyhow::anyhow!("user {} not found", user_id)))?;

    let keys = JwtKeys::from_ref(st);
    let access_token = keys
        .issue_access_token(&user)
        .context("sign access token")
        .map_err(TokenError::Internal)?;
    let refresh_token = keys
        .issue_refresh_token(&user)
        .context("sign refresh token")
        .map_err(TokenError::Internal)?;

    let stored = st
        .users
        .set_refresh_token(user.id, Some(&refresh_token))
        .await
        .map_err(TokenError::Internal)?;
    if !stored {
        return Err(TokenError::Internal(anyhow::anyhow!(
            "user {} vanished while storing refresh token",
            user.id
        )));
    }

    info!(user_id = %user.id, "token pair issued");
    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Verifies a presented refresh token: cryptographic checks first, then
/// equality with the token currently stored for the user.
pub async fn verify_refresh_token(
    st: &AppState,
    token: Option<&str>,
) -> Result<RefreshClaims, TokenError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(TokenError::Missing)?;

    let claims = JwtKeys::from_ref(st)
        .verify_refresh(token)
        .map_err(TokenError::Invalid)?;

    let user = st
        .users
        .find_by_id(claims.sub)
        .await
        .map_err(TokenError::Internal)?
        .ok_or(TokenError::UnknownUser)?;

    if user.refresh_token.as_deref() != Some(token) {
        warn!(user_id = %user.id, "stale or foreign refresh token presented");
        return Err(TokenError::Mismatch);
    }
    Ok(claims)
}
