//! Access-token verification for the `WebSocket` upgrade.
//!
//! The hub never authenticates; this module turns the request's token into
//! a [`UserId`] before the connection exists.

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use parley_core::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Authentication failures. All of them map to `401 Unauthorized`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Neither the cookie nor the `Authorization` header carried a token.
    #[error("missing access token")]
    MissingToken,
    /// The token failed signature, expiry or claim validation.
    #[error("invalid access token: {0}")]
    InvalidToken(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Access-token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user.
    #[serde(rename = "UserID")]
    pub user_id: Uuid,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

/// Resolves an access token to the user it was issued for.
pub trait TokenVerifier: Send + Sync {
    /// Validate `token` and return its user.
    fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// HS256 JWT verifier over a shared secret.
pub struct JwtVerifier {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl JwtVerifier {
    /// Verifier for `secret`. An empty secret rejects every token.
    pub fn new(secret: &str) -> Self {
        let key = (!secret.is_empty()).then(|| DecodingKey::from_secret(secret.as_bytes()));
        Self {
            key,
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let Some(key) = &self.key else {
            return Err(AuthError::InvalidToken("no signing secret configured".into()));
        };
        let data = jsonwebtoken::decode::<Claims>(token, key, &self.validation)
            .map_err(|err| AuthError::InvalidToken(err.to_string()))?;
        Ok(UserId::from_uuid(data.claims.user_id))
    }
}

/// Pull the raw token from the named cookie, falling back to a bearer header.
pub fn extract_token(headers: &HeaderMap, jar: &CookieJar, cookie_name: &str) -> Option<String> {
    if let Some(cookie) = jar.get(cookie_name) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_owned());
        }
    }
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

/// Authenticate a request: extract, then verify.
pub fn authenticate(
    verifier: &dyn TokenVerifier,
    headers: &HeaderMap,
    jar: &CookieJar,
    cookie_name: &str,
) -> Result<UserId, AuthError> {
    let token = extract_token(headers, jar, cookie_name).ok_or(AuthError::MissingToken)?;
    verifier.verify(&token)
}
