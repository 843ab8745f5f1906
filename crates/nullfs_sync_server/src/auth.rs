//! HTTP Basic credentials.
//!
//! Peers present `Authorization: Basic base64(name:password)`. Checking the
//! credential is left to the relay service, which owns the access gate.

use crate::error::{ServerError, ServerResult};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use nullfs_sync_engine::Credential;

/// Credential taken from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct BasicAuth(pub Credential);

/// Parses the value of an `Authorization` header.
///
/// # Errors
///
/// Returns [`ServerError::Unauthorized`] if the scheme is not `Basic` or
/// the payload is not base64 of `name:password`.
pub fn parse_basic(value: &str) -> ServerResult<Credential> {
    let (scheme, payload) = value
        .trim()
        .split_once(' ')
        .ok_or_else(|| ServerError::Unauthorized("malformed authorization header".into()))?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(ServerError::Unauthorized(format!(
            "unsupported authorization scheme {scheme:?}"
        )));
    }
    let decoded = STANDARD
        .decode(payload.trim())
        .map_err(|_| ServerError::Unauthorized("credential is not base64".into()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| ServerError::Unauthorized("credential is not UTF-8".into()))?;
    let (name, password) = decoded
        .split_once(':')
        .ok_or_else(|| ServerError::Unauthorized("credential lacks a password".into()))?;
    if name.is_empty() {
        return Err(ServerError::Unauthorized("empty user name".into()));
    }
    Ok(Credential::new(name, password))
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for BasicAuth {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ServerError::Unauthorized("credentials required".into()))?
            .to_str()
            .map_err(|_| ServerError::Unauthorized("malformed authorization header".into()))?;
        parse_basic(value).map(BasicAuth)
    }
}
