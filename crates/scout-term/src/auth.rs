//! Session-cookie authentication.
//!
//! The login flow lives elsewhere; it hands the browser a cookie holding an
//! HS256 token whose `sid` claim names the browser session. The gateway
//! only verifies that token and reads the claim back.

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::AuthError;
use crate::terminal::types::SessionId;

/// Decides whether a request belongs to an authenticated browser session.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Result<SessionId, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sid: String,
    pub exp: u64,
}

pub struct CookieAuthenticator {
    cookie_name: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl CookieAuthenticator {
    pub fn new(cookie_name: impl Into<String>, secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            cookie_name: cookie_name.into(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Mint a token for `sid`, valid for `ttl`.
    pub fn issue_token(&self, sid: &str, ttl: Duration) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = SessionClaims {
            sid: sid.to_string(),
            exp: jsonwebtoken::get_current_timestamp() + ttl.as_secs(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
    }

    fn verify(&self, token: &str) -> Result<SessionId, AuthError> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let sid = data.claims.sid.trim();
        if sid.is_empty() {
            return Err(AuthError::InvalidToken("empty session id".to_string()));
        }
        Ok(SessionId::new(sid))
    }
}

impl Authenticator for CookieAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Result<SessionId, AuthError> {
        let token = cookie_value(headers, &self.cookie_name).ok_or(AuthError::MissingCookie)?;
        self.verify(token)
    }
}

/// Find a cookie by name across all `Cookie` headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
        .filter(|value| !value.is_empty())
}
