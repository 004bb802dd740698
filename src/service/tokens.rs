use crate::config::TokenConfig;
use crate::error::app_error::AppError;
use crate::models::user::User;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by the short-lived access credential. Transient, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by the long-lived refresh credential. `sid` is the
/// session id of the row the token belongs to; it changes on every rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and verifies the two token kinds with independent secrets, so a
/// leaked access key never mints refresh credentials and vice versa.
pub struct TokenCodec {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl TokenCodec {
    /// Fails when either secret is unset; a codec without keys is a startup
    /// misconfiguration, not a per-request condition.
    pub fn from_config(config: &TokenConfig) -> Result<Self, AppError> {
        if config.access_secret.is_empty() {
            return Err(AppError::configuration("tokens.access_secret is not set"));
        }
        if config.refresh_secret.is_empty() {
            return Err(AppError::configuration("tokens.refresh_secret is not set"));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        // No leeway: an expired credential is expired, exactly.
        validation.leeway = 0;

        Ok(Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_ttl: Duration::seconds(config.access_ttl_seconds),
            refresh_ttl: Duration::seconds(config.refresh_ttl_seconds),
            validation,
        })
    }

    pub fn issue_access(&self, user: &User) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
            .map_err(|_| AppError::configuration("failed to sign access token"))
    }

    pub fn issue_refresh(&self, user_id: Uuid, session_id: Uuid) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: user_id,
            sid: session_id,
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding)
            .map_err(|_| AppError::configuration("failed to sign refresh token"))
    }

    /// Every verification failure collapses to `Unauthorized`; the caller
    /// cannot tell a bad signature from an expired token, and neither can
    /// the client.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AppError> {
        decode::<AccessClaims>(token, &self.access_decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| AppError::Unauthorized)
    }

    /// Same uniform failure rule as [`verify_access`](Self::verify_access).
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, AppError> {
        decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| AppError::InvalidRefreshToken)
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }
}
