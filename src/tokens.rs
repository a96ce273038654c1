/// Token issuance and verification
///
/// Two token classes with distinct signing secrets: short-lived access
/// tokens carrying identity claims, and long-lived refresh tokens that
/// rotate on every use. Compromise of one class cannot forge the other.
use crate::{
    account::{Role, User},
    config::AuthConfig,
    error::{ApiError, ApiResult},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by a refresh token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Access + refresh token pair returned by session operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Stateless token service
#[derive(Clone)]
pub struct TokenService {
    access_secret: String,
    refresh_secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            access_secret: config.access_token_secret.clone(),
            refresh_secret: config.refresh_token_secret.clone(),
            access_ttl: Duration::minutes(config.access_token_ttl_minutes),
            refresh_ttl: Duration::days(config.refresh_token_ttl_days),
        }
    }

    /// Issue a short-lived access token for a user
    pub fn issue_access(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.access_secret.as_bytes()),
        )
        .map_err(|e| ApiError::Jwt(format!("Failed to generate access token: {}", e)))
    }

    /// Issue a long-lived refresh token for a user
    pub fn issue_refresh(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: user.id.clone(),
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.refresh_secret.as_bytes()),
        )
        .map_err(|e| ApiError::Jwt(format!("Failed to generate refresh token: {}", e)))
    }

    /// Issue an access + refresh pair for a user
    pub fn issue_pair(&self, user: &User) -> ApiResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue_access(user)?,
            refresh_token: self.issue_refresh(user)?,
        })
    }

    /// Verify an access token. Signature and expiry are checked uniformly
    /// by the JWT library; any failure is an authentication error.
    pub fn verify_access(&self, token: &str) -> ApiResult<AccessClaims> {
        decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.access_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|_| ApiError::Authentication("Invalid or expired token".to_string()))
    }

    /// Verify a refresh token
    pub fn verify_refresh(&self, token: &str) -> ApiResult<RefreshClaims> {
        decode::<RefreshClaims>(
            token,
            &DecodingKey::from_secret(self.refresh_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|_| ApiError::Authentication("Invalid refresh token".to_string()))
    }
}
