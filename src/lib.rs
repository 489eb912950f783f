//! pcs-token - OAuth 2.0 access tokens for the Baidu PCS API
//!
//! This library implements the OAuth 2.0 authorization code flow against the
//! Baidu OpenAPI identity provider and keeps the resulting token in a local
//! flat file, so repeated calls do not go back to the network.
//!
//! # Features
//!
//! - Authorization URL construction with every provider parameter
//! - Code exchange and refresh against the token endpoint
//! - Single-row CSV token cache, refreshed one day before the embedded expiry
//! - Loopback callback listener for command-line logins
//! - Pluggable HTTP transport and token storage
//!
//! # Example
//!
//! ```
//! use pcs_token::prelude::*;
//! use std::sync::Arc;
//!
//! let config = OAuthConfig::new("your-api-key", "your-secret-key")
//!     .with_redirect_uri("http://127.0.0.1:8080/callback");
//!
//! let client = OAuthClient::new(config).unwrap();
//! let request = AuthorizationRequest::from_config(client.config()).with_random_state();
//! let url = client.authorization_url(&request).unwrap();
//! assert!(url.as_str().starts_with("https://openapi.baidu.com/oauth/2.0/authorize?"));
//!
//! let store = Arc::new(MemoryTokenStore::new());
//! let manager = TokenManager::new(client, store);
//! match manager.access_token(None) {
//!     Err(OAuthError::AuthorizationRequired { url }) => println!("Visit {}", url),
//!     other => panic!("unexpected: {:?}", other),
//! }
//! ```

pub mod authorize;
pub mod callback;
pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod store;
pub mod token;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::authorize::{AuthorizationRequest, Display};
    pub use crate::client::OAuthClient;
    pub use crate::config::OAuthConfig;
    pub use crate::error::{OAuthError, Result};
    pub use crate::manager::TokenManager;
    pub use crate::store::{FileTokenStore, MemoryTokenStore, TokenStore};
    pub use crate::token::{CachedToken, TokenResponse};
    pub use crate::transport::{HttpTransport, ReqwestTransport};
}
