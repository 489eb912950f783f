/// OAuth 2.0 authorization code flow against the token endpoint
use crate::authorize::AuthorizationRequest;
use crate::config::OAuthConfig;
use crate::error::{OAuthError, Result};
use crate::token::{parse_token_body, TokenResponse};
use crate::transport::{HttpTransport, ReqwestTransport};
use url::Url;

/// OAuth 2.0 client
///
/// Issues the three requests of the flow: the authorization redirect, the
/// code exchange, and the refresh. Every token request is a GET with the
/// parameters in the query string.
pub struct OAuthClient<T: HttpTransport = ReqwestTransport> {
    config: OAuthConfig,
    transport: T,
}

impl OAuthClient<ReqwestTransport> {
    /// Create a client using the default blocking `reqwest` transport
    pub fn new(config: OAuthConfig) -> Result<Self> {
        Ok(Self::with_transport(config, ReqwestTransport::new()?))
    }
}

impl<T: HttpTransport> OAuthClient<T> {
    pub fn with_transport(config: OAuthConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// URL the user agent must visit to obtain an authorization code
    pub fn authorization_url(&self, request: &AuthorizationRequest) -> Result<Url> {
        request.build_url(&self.config.authorize_endpoint()?, &self.config.client_id)
    }

    /// Exchange an authorization code for an access/refresh token pair
    ///
    /// `redirect_uri` must equal the one used for the authorization request;
    /// the configured redirect URI is used when `None`.
    pub fn fetch_access_token(&self, code: &str, redirect_uri: Option<&str>) -> Result<TokenResponse> {
        let redirect_uri = redirect_uri
            .or(self.config.redirect_uri.as_deref())
            .ok_or_else(|| OAuthError::MissingField("redirect_uri".into()))?;

        let mut url = self.config.token_endpoint()?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("client_secret", &self.config.client_secret)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code);

        tracing::info!("exchanging authorization code for an access token");
        self.request_token(&url)
    }

    /// Mint a new access token from a refresh token
    ///
    /// `scope` may only narrow the scope granted originally; `None` keeps it.
    pub fn refresh_access_token(&self, refresh_token: &str, scope: Option<&str>) -> Result<TokenResponse> {
        let mut url = self.config.token_endpoint()?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("client_secret", &self.config.client_secret)
                .append_pair("refresh_token", refresh_token)
                .append_pair("grant_type", "refresh_token");
            if let Some(scope) = scope {
                query.append_pair("scope", scope);
            }
        }

        tracing::info!("refreshing access token");
        self.request_token(&url)
    }

    fn request_token(&self, url: &Url) -> Result<TokenResponse> {
        let body = self.transport.get(url)?;
        let result = parse_token_body(&body);
        if let Err(OAuthError::Provider { error, .. }) = &result {
            tracing::warn!(%error, "token endpoint returned an error");
        }
        result
    }
}
