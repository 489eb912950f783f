/// HTTP transport used to reach the token endpoint
use crate::error::Result;
use std::time::Duration;
use url::Url;

/// Minimal HTTP capability needed by the client: GET a URL, return the body
///
/// Non-2xx statuses must not be turned into errors here. The token endpoint
/// answers failures with `400` and a JSON error body that the caller decodes.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &Url) -> Result<String>;
}

/// Blocking `reqwest` transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a transport with the default 30 second timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pcs-token/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client, e.g. one configured with a proxy
    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &Url) -> Result<String> {
        let response = self.client.get(url.clone()).send()?;
        let status = response.status();
        let body = response.text()?;
        tracing::debug!(status = status.as_u16(), path = url.path(), "token endpoint responded");
        Ok(body)
    }
}
