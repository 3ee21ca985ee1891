//! Bearer tokens for the exposure optimizer API.
//!
//! The server accepts HS256 tokens signed with `RUNCOACH_JWT_SECRET` whose
//! subject is the user id.

use anyhow::{Context, Result};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    /// Expiration time (Unix timestamp)
    exp: u64,
    /// Issued at (Unix timestamp)
    iat: u64,
}

/// Token settings.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub secret: String,
    /// Token validity in hours
    pub expiry_hours: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: "change-me".to_string(),
            expiry_hours: 24,
        }
    }
}

/// Sign a token for `user_id`.
///
/// ```
/// use runcoach_cli::auth::{issue_token, TokenConfig};
///
/// let token = issue_token("runner-1", &TokenConfig::default()).unwrap();
/// assert_eq!(token.split('.').count(), 3);
/// ```
pub fn issue_token(user_id: &str, config: &TokenConfig) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("Failed to get current time")?
        .as_secs();

    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + config.expiry_hours * 3600,
        iat: now,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .context("Failed to encode JWT token")
}
