/// Client credentials and endpoint configuration
use crate::error::{OAuthError, Result};
use url::Url;

/// Base URL of the Baidu OpenAPI OAuth 2.0 service
pub const DEFAULT_BASE_URL: &str = "https://openapi.baidu.com/oauth/2.0/";

/// Scope needed by the PCS (netdisk) API
pub const DEFAULT_SCOPE: &str = "netdisk";

/// Redirect URI for applications without a web server.
///
/// The provider then shows the authorization code on its own page instead of
/// redirecting.
pub const OOB_REDIRECT_URI: &str = "oob";

/// OAuth 2.0 client configuration
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Must end with `/` so endpoint names join under it
    pub base_url: String,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
}

impl OAuthConfig {
    /// Create a configuration against the default provider with the `netdisk` scope
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            redirect_uri: None,
            scope: Some(DEFAULT_SCOPE.to_string()),
        }
    }

    /// Point the client at another OAuth 2.0 base URL
    ///
    /// A trailing `/` is added when missing.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = normalize_base_url(base_url)?;
        Ok(self)
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Load the configuration from `PCS_*` environment variables
    ///
    /// - `PCS_CLIENT_ID` and `PCS_CLIENT_SECRET` are required
    /// - `PCS_OAUTH_BASE_URL`, `PCS_REDIRECT_URI` and `PCS_SCOPE` are optional
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`OAuthConfig::from_env`], reading variables through `lookup`
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| OAuthError::MissingField(name.to_string()))
        };
        let client_id = required("PCS_CLIENT_ID")?;
        let client_secret = required("PCS_CLIENT_SECRET")?;

        let mut config = Self::new(client_id, client_secret);
        if let Some(base_url) = lookup("PCS_OAUTH_BASE_URL") {
            config = config.with_base_url(&base_url)?;
        }
        if let Some(redirect_uri) = lookup("PCS_REDIRECT_URI") {
            config = config.with_redirect_uri(redirect_uri);
        }
        if let Some(scope) = lookup("PCS_SCOPE") {
            config = config.with_scope(scope);
        }

        Ok(config)
    }

    /// The authorization endpoint the user agent is redirected to
    pub fn authorize_endpoint(&self) -> Result<Url> {
        Ok(Url::parse(&self.base_url)?.join("authorize")?)
    }

    /// The token endpoint used for code exchange and refresh
    pub fn token_endpoint(&self) -> Result<Url> {
        Ok(Url::parse(&self.base_url)?.join("token")?)
    }
}

fn normalize_base_url(base_url: &str) -> Result<String> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };
    Url::parse(&normalized)?;
    Ok(normalized)
}
