use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Caller;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Caller email
    pub sub: String,
    #[serde(default)]
    pub superuser: bool,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(email: impl Into<String>, superuser: bool, expiry_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: email.into(),
            superuser,
            exp: (now + Duration::hours(expiry_hours)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

impl From<Claims> for Caller {
    fn from(claims: Claims) -> Self {
        Caller::new(claims.sub, claims.superuser)
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT secret not configured")]
    InvalidSecret,

    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),
}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }
    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &encoding_key)
        .map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

/// Verify signature and expiry, returning the claims
pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &decoding_key, &Validation::new(Algorithm::HS256))
        .map(|data| data.claims)
        .map_err(|e| JwtError::InvalidToken(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_identity() {
        let token = generate_jwt(&Claims::new("a@example.com", true, 1), "secret").unwrap();
        let caller = Caller::from(validate_jwt(&token, "secret").unwrap());
        assert_eq!(caller, Caller::new("a@example.com", true));
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let token = generate_jwt(&Claims::new("a@example.com", false, 1), "secret").unwrap();
        assert!(matches!(validate_jwt(&token, "other"), Err(JwtError::InvalidToken(_))));

        let expired = generate_jwt(&Claims::new("a@example.com", false, -2), "secret").unwrap();
        assert!(matches!(validate_jwt(&expired, "secret"), Err(JwtError::InvalidToken(_))));
        assert!(matches!(validate_jwt(&token, ""), Err(JwtError::InvalidSecret)));
    }
}
