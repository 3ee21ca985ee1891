//! Bearer-token authentication for user endpoints.
//!
//! Tokens are HS256 JWTs whose `sub` claim is the user id. The middleware
//! rejects anonymous requests and hands the user id to handlers as an
//! [`AuthUser`] extension.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
}

/// Authenticated caller, inserted by [`require_user`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

#[derive(Clone)]
pub struct JwtKeys {
    decoding: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        Self {
            decoding: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation: Arc::new(validation),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|err| ApiError::Unauthorized(format!("invalid token: {}", err)))?;
        if data.claims.sub.trim().is_empty() {
            return Err(ApiError::Unauthorized("token has no subject".to_string()));
        }
        Ok(data.claims)
    }
}

/// Mint a user token valid for `ttl_secs`.
pub fn issue_token(
    secret: &str,
    user_id: &str,
    ttl_secs: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + ttl_secs,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// `Authorization: Bearer <token>`, trimmed and non-empty.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|text| text.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn require_user(
    State(keys): State<JwtKeys>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer(request.headers()) else {
        return ApiError::Unauthorized("Authorization: Bearer <token> required".to_string())
            .into_response();
    };

    match keys.verify(token) {
        Ok(claims) => {
            tracing::Span::current().record("user_id", claims.sub.as_str());
            request.extensions_mut().insert(AuthUser(claims.sub));
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn issued_tokens_verify() {
        let token = issue_token("secret", "runner-1", 3600).unwrap();
        let claims = JwtKeys::new("secret").verify(&token).unwrap();
        assert_eq!(claims.sub, "runner-1");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("secret", "runner-1", 3600).unwrap();
        let err = JwtKeys::new("other").verify(&token).unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let claims = Claims {
            sub: "runner-1".to_string(),
            exp: 1_000,
            iat: 0,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(JwtKeys::new("secret").verify(&token).is_err());
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer  tok "));
        assert_eq!(extract_bearer(&headers), Some("tok"));
    }
}
