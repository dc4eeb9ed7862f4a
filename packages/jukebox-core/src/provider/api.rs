//! Low-level Web API plumbing for the streaming provider.
//!
//! This module owns the error model, credential handling, the token
//! exchange, and HTTP status mapping. High-level commands live in
//! `client.rs`.

use std::fmt;
use std::time::{Duration, Instant};

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::protocol_constants::{PROVIDER_HTTP_TIMEOUT_SECS, TOKEN_REFRESH_MARGIN_SECS};

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur while talking to the provider's Web API.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The access token was rejected (401). The cached token is dropped.
    #[error("Access token expired or revoked")]
    AuthExpired,

    /// Exchanging the refresh token for an access token failed.
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// The provider is throttling us (429).
    #[error("Rate limited by provider")]
    RateLimited {
        /// Value of the `Retry-After` header, when present.
        retry_after_secs: Option<u64>,
    },

    /// No device is currently active for playback commands.
    #[error("No active playback device")]
    NoActiveDevice,

    /// Requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-success HTTP status.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// Response body did not match the expected shape.
    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    /// A caller-imposed deadline elapsed.
    #[error("Provider request timed out")]
    Timeout,
}

/// Convenient Result alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    /// Returns true if this error is transient and the operation may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AuthExpired
            | Self::RateLimited { .. }
            | Self::NoActiveDevice
            | Self::Timeout => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::HttpStatus(status, _) => *status >= 500,
            _ => false,
        }
    }

    /// Returns true for failures caused by connectivity rather than by the
    /// provider's answer. Used to rate-limit log noise while offline.
    #[must_use]
    pub fn is_network(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout => true,
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials & Tokens
// ─────────────────────────────────────────────────────────────────────────────

/// Application credentials plus a long-lived user refresh token.
#[derive(Clone, Deserialize)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl fmt::Debug for SpotifyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// A bearer token with its local expiry deadline.
#[derive(Debug, Clone)]
pub(crate) struct AccessToken {
    pub value: String,
    pub expires_at: Instant,
}

impl AccessToken {
    /// True while the token can still be used.
    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    /// The provider may rotate the refresh token.
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Result of a refresh-token exchange.
#[derive(Debug)]
pub(crate) struct RefreshedToken {
    pub token: AccessToken,
    pub rotated_refresh_token: Option<String>,
}

/// Exchanges the refresh token for a new access token.
///
/// The returned token expires [`TOKEN_REFRESH_MARGIN_SECS`] before the
/// provider's stated lifetime so that requests never race the real expiry.
pub(crate) async fn request_access_token(
    client: &Client,
    accounts_base: &str,
    credentials: &SpotifyCredentials,
) -> ProviderResult<RefreshedToken> {
    let url = format!("{}/api/token", accounts_base.trim_end_matches('/'));
    log::debug!("[Spotify] Refreshing access token");

    let res = client
        .post(&url)
        .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", credentials.refresh_token.as_str()),
        ])
        .timeout(Duration::from_secs(PROVIDER_HTTP_TIMEOUT_SECS))
        .send()
        .await?;

    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(ProviderError::TokenRefresh(format!(
            "status {}: {}",
            status.as_u16(),
            body
        )));
    }

    let parsed: TokenResponse = res
        .json()
        .await
        .map_err(|e| ProviderError::TokenRefresh(e.to_string()))?;

    let lifetime = parsed.expires_in.saturating_sub(TOKEN_REFRESH_MARGIN_SECS);
    log::info!("[Spotify] Access token refreshed (valid {}s)", lifetime);

    Ok(RefreshedToken {
        token: AccessToken {
            value: parsed.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        },
        rotated_refresh_token: parsed.refresh_token,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Status Mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Maps a non-success status and its body to a [`ProviderError`].
pub(crate) fn map_error_status(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED => ProviderError::AuthExpired,
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after_secs },
        StatusCode::NOT_FOUND if body.contains("NO_ACTIVE_DEVICE") => {
            ProviderError::NoActiveDevice
        }
        StatusCode::NOT_FOUND => ProviderError::NotFound(body.to_string()),
        _ => ProviderError::HttpStatus(status.as_u16(), body.to_string()),
    }
}

/// Passes successful responses through and converts the rest to errors.
pub(crate) async fn check_response(res: Response) -> ProviderResult<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let retry_after_secs = res
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    let body = res.text().await.unwrap_or_default();
    Err(map_error_status(status, retry_after_secs, &body))
}
