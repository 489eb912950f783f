/// Error types for token acquisition and caching
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error object reported by the identity provider, passed through untouched
    #[error("OAuth error: {error}, description: {description:?}")]
    Provider {
        error: String,
        description: Option<String>,
    },

    /// No cached token and no authorization code: the user agent must visit `url`
    #[error("Authorization required, open: {url}")]
    AuthorizationRequired { url: String },

    #[error("No cached token, authorize first")]
    NoCachedToken,

    #[error("Authorization denied by user")]
    AuthorizationDenied,

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Access token carries no expiry timestamp: {0}")]
    InvalidAccessToken(String),

    #[error("Malformed token cache: {0}")]
    InvalidCache(String),

    /// The cache could not be persisted. Callers must not continue as if it were.
    #[error("Failed to write token cache {}: {source}", path.display())]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, OAuthError>;
