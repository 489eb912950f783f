/// Token endpoint responses and the cached token record
use crate::error::{OAuthError, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The cached token is refreshed this many seconds before its embedded expiry
pub const REFRESH_MARGIN_SECS: u64 = 86_400;

/// Successful token endpoint response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    /// Refresh responses may leave this out
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub session_secret: Option<String>,
}

/// Error object returned by the token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl From<ProviderError> for OAuthError {
    fn from(err: ProviderError) -> Self {
        OAuthError::Provider {
            error: err.error,
            description: err.error_description,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenEndpointBody {
    Error(ProviderError),
    Token(TokenResponse),
}

/// Decode a token endpoint body, turning a provider error object into `OAuthError::Provider`
pub fn parse_token_body(body: &str) -> Result<TokenResponse> {
    match serde_json::from_str::<TokenEndpointBody>(body) {
        Ok(TokenEndpointBody::Token(token)) => Ok(token),
        Ok(TokenEndpointBody::Error(err)) => Err(err.into()),
        // Re-decode as the success shape to surface a precise serde error
        Err(_) => serde_json::from_str::<TokenResponse>(body).map_err(OAuthError::from),
    }
}

/// Expiry timestamp embedded in an access token
///
/// Access tokens look like `1.<hash>.<lifetime>.<expiry>-<uid>-<appid>`; the
/// leading digits of the fourth segment are the unix expiry.
pub fn embedded_expiry(access_token: &str) -> Result<u64> {
    let segment = access_token
        .split('.')
        .nth(3)
        .ok_or_else(|| OAuthError::InvalidAccessToken(access_token.to_string()))?;

    let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits
        .parse()
        .map_err(|_| OAuthError::InvalidAccessToken(access_token.to_string()))
}

/// Token record persisted in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    /// Unix time after which the token is refreshed
    pub checkpoint: u64,
    pub access_token: String,
    pub refresh_token: String,
}

impl CachedToken {
    /// Build the record for a freshly issued token
    ///
    /// `fallback_refresh` is kept when the response carries no refresh token.
    pub fn from_response(response: &TokenResponse, fallback_refresh: Option<&str>) -> Result<Self> {
        let refresh_token = response
            .refresh_token
            .as_deref()
            .or(fallback_refresh)
            .ok_or_else(|| OAuthError::MissingField("refresh_token".into()))?
            .to_string();

        let expiry = embedded_expiry(&response.access_token)?;

        Ok(Self {
            checkpoint: expiry.saturating_sub(REFRESH_MARGIN_SECS),
            access_token: response.access_token.clone(),
            refresh_token,
        })
    }

    /// Whether `now` is past the refresh checkpoint
    pub fn needs_refresh(&self, now: u64) -> bool {
        now > self.checkpoint
    }
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
