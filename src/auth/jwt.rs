use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::{
        claims::{AccessClaims, RefreshClaims, TokenKind},
        repo_types::User,
    },
    config::JwtConfig,
    state::AppState,
};

/// Signing and verification keys. Access and refresh tokens use separate secrets.
#[derive(Clone)]
pub struct JwtKeys {
    pub access_encoding: EncodingKey,
    pub access_decoding: DecodingKey,
    pub refresh_encoding: EncodingKey,
    pub refresh_decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// Upper bound on configured token lifetimes (ten years).
const MAX_TTL_MINUTES: i64 = 60 * 24 * 365 * 10;

fn ttl_from_minutes(minutes: i64) -> Duration {
    Duration::from_secs(minutes.clamp(0, MAX_TTL_MINUTES) as u64 * 60)
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::from_config(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        let JwtConfig {
            access_secret,
            refresh_secret,
            issuer,
            audience,
            ttl_minutes,
            refresh_ttl_minutes,
        } = cfg.clone();
        Self {
            access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
            issuer,
            audience,
            access_ttl: ttl_from_minutes(ttl_minutes),
            refresh_ttl: ttl_from_minutes(refresh_ttl_minutes),
        }
    }

    fn window(ttl: Duration) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation
    }

    pub fn issue_access_token(&self, user: &User) -> anyhow::Result<String> {
        let (iat, exp) = Self::window(self.access_ttl);
        let claims = AccessClaims {
            sub: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            fullname: user.fullname.clone(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Access,
        };
        let token = encode(&Header::default(), &claims, &self.access_encoding)?;
        debug!(user_id = %user.id, "access token signed");
        Ok(token)
    }

    pub fn issue_refresh_token(&self, user: &User) -> anyhow::Result<String> {
        let (iat, exp) = Self::window(self.refresh_ttl);
        let claims = RefreshClaims {
            sub: user.id,
            jti: Uuid::new_v4(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Refresh,
        };
        let token = encode(&Header::default(), &claims, &self.refresh_encoding)?;
        debug!(user_id = %user.id, "refresh token signed");
        Ok(token)
    }

    fn verify<C: DeserializeOwned>(
        &self,
        token: &str,
        key: &DecodingKey,
        kind: fn(&C) -> TokenKind,
        expected: TokenKind,
    ) -> anyhow::Result<C> {
        let data = decode::<C>(token, key, &self.validation())?;
        if kind(&data.claims) != expected {
            anyhow::bail!("wrong token kind, expected {:?}", expected);
        }
        Ok(data.claims)
    }

    /// Signature, expiry, issuer, audience and kind check. No store lookup.
    pub fn verify_access(&self, token: &str) -> anyhow::Result<AccessClaims> {
        let claims = self.verify(token, &self.access_decoding, |c: &AccessClaims| c.kind, TokenKind::Access)?;
        debug!(user_id = %claims.sub, "access token verified");
        Ok(claims)
    }

    /// Signature, expiry, issuer, audience and kind check. No store lookup.
    pub fn verify_refresh(&self, token: &str) -> anyhow::Result<RefreshClaims> {
        let claims = self.verify(token, &self.refresh_decoding, |c: &RefreshClaims| c.kind, TokenKind::Refresh)?;
        debug!(user_id = %claims.sub, "refresh token verified");
        Ok(claims)
    }
}
