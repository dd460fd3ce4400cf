//! Upgrade authentication.
//!
//! The bearer token is looked up in the `access_token` cookie, then the
//! `token` query parameter, then an `Authorization: Bearer` header, and
//! handed to a [`TokenVerifier`] that resolves it to a user id.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use courier_core::UserId;
use std::collections::HashMap;
use thiserror::Error;

/// Cookie carrying the access token.
pub const TOKEN_COOKIE: &str = "access_token";

/// Query parameter carrying the access token.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No token in cookie, query or header.
    #[error("Missing access token")]
    MissingToken,

    /// The verifier rejected the token.
    #[error("Invalid access token")]
    InvalidToken,
}

/// Resolves an access token to the user it was issued for.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Verifier backed by a fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    /// Create a verifier from a token to user id map.
    #[must_use]
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

/// Find the access token of an upgrade request.
#[must_use]
pub fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    cookie_token(headers)
        .or_else(|| {
            query
                .get(TOKEN_QUERY_PARAM)
                .filter(|t| !t.is_empty())
                .cloned()
        })
        .or_else(|| bearer_token(headers))
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Extract and verify the token of an upgrade request.
///
/// # Errors
///
/// Returns [`AuthError::MissingToken`] if no token is present, or the
/// verifier's error.
pub async fn authenticate(
    verifier: &dyn TokenVerifier,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<UserId, AuthError> {
    let token = extract_token(headers, query).ok_or(AuthError::MissingToken)?;
    verifier.verify(&token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn verifier() -> StaticTokenVerifier {
        StaticTokenVerifier::new(HashMap::from([("t-alice".to_string(), "alice".to_string())]))
    }

    #[test]
    fn test_cookie_wins_over_query_and_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; access_token=from-cookie"),
        );
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        let token = extract_token(&headers, &query(&[("token", "from-query")]));
        assert_eq!(token.as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_query_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        let token = extract_token(&headers, &query(&[("token", "from-query")]));
        assert_eq!(token.as_deref(), Some("from-query"));
    }

    #[test]
    fn test_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(
            extract_token(&headers, &HashMap::new()).as_deref(),
            Some("from-header")
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_token(&headers, &HashMap::new()), None);
    }

    #[test]
    fn test_empty_values_are_skipped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("access_token="));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        let token = extract_token(&headers, &query(&[("token", "")]));
        assert_eq!(token.as_deref(), Some("from-header"));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let verifier = verifier();

        let ok = authenticate(&verifier, &HeaderMap::new(), &query(&[("token", "t-alice")])).await;
        assert_eq!(ok, Ok("alice".to_string()));

        let bad = authenticate(&verifier, &HeaderMap::new(), &query(&[("token", "nope")])).await;
        assert_eq!(bad, Err(AuthError::InvalidToken));

        let missing = authenticate(&verifier, &HeaderMap::new(), &HashMap::new()).await;
        assert_eq!(missing, Err(AuthError::MissingToken));
    }
}
