/// Cached access token lifecycle
use crate::authorize::{open_in_browser, AuthorizationRequest};
use crate::callback::CallbackServer;
use crate::client::OAuthClient;
use crate::config::OOB_REDIRECT_URI;
use crate::error::{OAuthError, Result};
use crate::store::TokenStore;
use crate::token::{unix_now, CachedToken};
use crate::transport::HttpTransport;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Hands out access tokens, hitting the network only when the cache is
/// empty or past its refresh checkpoint
pub struct TokenManager<T: HttpTransport, S: TokenStore> {
    client: OAuthClient<T>,
    store: Arc<S>,
}

impl<T: HttpTransport, S: TokenStore> TokenManager<T, S> {
    pub fn new(client: OAuthClient<T>, store: Arc<S>) -> Self {
        Self { client, store }
    }

    pub fn client(&self) -> &OAuthClient<T> {
        &self.client
    }

    /// Return a usable access token
    ///
    /// - A cached token is returned as is until its checkpoint passes, then
    ///   refreshed and the cache rewritten.
    /// - Without a cached token, `code` is exchanged for one.
    /// - Without either, `OAuthError::AuthorizationRequired` carries the URL
    ///   the user agent must be sent to.
    pub fn access_token(&self, code: Option<&str>) -> Result<String> {
        self.access_token_at(code, unix_now())
    }

    fn access_token_at(&self, code: Option<&str>, now: u64) -> Result<String> {
        if let Some(cached) = self.store.load()? {
            if !cached.needs_refresh(now) {
                tracing::debug!(checkpoint = cached.checkpoint, "using cached access token");
                return Ok(cached.access_token);
            }

            tracing::info!(checkpoint = cached.checkpoint, "cached access token is due for refresh");
            return self.refresh(&cached).map(|token| token.access_token);
        }

        match code {
            Some(code) => self.exchange_code(code).map(|token| token.access_token),
            None => {
                let request = AuthorizationRequest::from_config(self.client.config());
                let url = self.client.authorization_url(&request)?;
                Err(OAuthError::AuthorizationRequired {
                    url: url.to_string(),
                })
            }
        }
    }

    /// Exchange an authorization code and cache the result
    pub fn exchange_code(&self, code: &str) -> Result<CachedToken> {
        let response = self.client.fetch_access_token(code, None)?;
        let token = CachedToken::from_response(&response, None)?;
        self.store.save(&token)?;
        Ok(token)
    }

    /// Refresh now, regardless of the checkpoint
    pub fn force_refresh(&self) -> Result<CachedToken> {
        let cached = self.store.load()?.ok_or(OAuthError::NoCachedToken)?;
        self.refresh(&cached)
    }

    fn refresh(&self, cached: &CachedToken) -> Result<CachedToken> {
        let response = self
            .client
            .refresh_access_token(&cached.refresh_token, None)?;
        let token = CachedToken::from_response(&response, Some(&cached.refresh_token))?;
        self.store.save(&token)?;
        Ok(token)
    }

    /// The cached token, if any, without touching the network
    pub fn cached(&self) -> Result<Option<CachedToken>> {
        self.store.load()
    }

    /// Drop the local cache. The provider is not told.
    pub fn logout(&self) -> Result<()> {
        self.store.clear()
    }

    /// Run the whole flow through the system browser
    ///
    /// Listens on the configured `http://` redirect URI, opens the
    /// authorization page, and exchanges the code it receives. `on_url` gets
    /// the authorization URL in case no browser can be opened.
    pub fn login_with_browser(
        &self,
        timeout: Duration,
        on_url: impl FnOnce(&Url),
    ) -> Result<CachedToken> {
        self.login_via_callback(timeout, |url| {
            on_url(url);
            if let Err(e) = open_in_browser(url) {
                tracing::warn!("could not open browser: {}", e);
            }
        })
    }

    fn login_via_callback(
        &self,
        timeout: Duration,
        open: impl FnOnce(&Url),
    ) -> Result<CachedToken> {
        let redirect_uri = self
            .client
            .config()
            .redirect_uri
            .as_deref()
            .ok_or_else(|| OAuthError::MissingField("redirect_uri".into()))?;
        if redirect_uri == OOB_REDIRECT_URI {
            return Err(OAuthError::InvalidParameter(
                "browser login needs an http:// loopback redirect URI such as \
                 http://127.0.0.1:8080/callback; with `oob`, exchange the displayed code instead"
                    .into(),
            ));
        }
        let server = CallbackServer::for_redirect_uri(redirect_uri)?;

        let request = AuthorizationRequest::from_config(self.client.config()).with_random_state();
        let url = self.client.authorization_url(&request)?;
        open(&url);

        let callback = server.wait_for_callback(timeout)?;
        if callback.state != request.state {
            return Err(OAuthError::InvalidState);
        }

        self.exchange_code(&callback.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuthConfig;
    use crate::store::{FileTokenStore, MemoryTokenStore};
    use crate::transport::testing::ScriptedTransport;

    const FIRST_ACCESS: &str = "1.aaaa.86400.1292922000-2346678-124328";
    const FIRST_REFRESH: &str = "2.bbbb.604800.1293440400-2346678-124328";
    const SECOND_ACCESS: &str = "1.cccc.86400.1293008400-2346678-124328";
    const SECOND_REFRESH: &str = "2.dddd.604800.1293526800-2346678-124328";

    fn token_body(access: &str, refresh: Option<&str>) -> String {
        match refresh {
            Some(refresh) => format!(
                r#"{{"access_token":"{}","expires_in":86400,"refresh_token":"{}","scope":"basic netdisk"}}"#,
                access, refresh
            ),
            None => format!(r#"{{"access_token":"{}","expires_in":86400}}"#, access),
        }
    }

    fn manager<S: TokenStore>(
        store: Arc<S>,
    ) -> (TokenManager<ScriptedTransport, S>, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        let config = OAuthConfig::new("client", "secret").with_redirect_uri("oob");
        let client = OAuthClient::with_transport(config, transport.clone());
        (TokenManager::new(client, store), transport)
    }

    fn grant_type(transport: &ScriptedTransport, index: usize) -> String {
        transport.requests()[index]
            .query_pairs()
            .find(|(k, _)| k == "grant_type")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    }

    #[test]
    fn test_no_cache_no_code_requires_authorization() {
        let (manager, transport) = manager(Arc::new(MemoryTokenStore::new()));

        match manager.access_token(None) {
            Err(OAuthError::AuthorizationRequired { url }) => {
                assert!(url.starts_with("https://openapi.baidu.com/oauth/2.0/authorize?"));
                assert!(url.contains("client_id=client"));
                assert!(url.contains("redirect_uri=oob"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_code_exchange_populates_cache() {
        let store = Arc::new(MemoryTokenStore::new());
        let (manager, transport) = manager(store.clone());
        transport.push(&token_body(FIRST_ACCESS, Some(FIRST_REFRESH)));

        let access = manager.access_token_at(Some("the-code"), 1292800000).unwrap();

        assert_eq!(access, FIRST_ACCESS);
        assert_eq!(grant_type(&transport, 0), "authorization_code");
        assert_eq!(
            store.load().unwrap(),
            Some(CachedToken {
                checkpoint: 1292922000 - 86400,
                access_token: FIRST_ACCESS.to_string(),
                refresh_token: FIRST_REFRESH.to_string(),
            })
        );
    }

    #[test]
    fn test_cache_hit_makes_no_request() {
        let store = Arc::new(MemoryTokenStore::new());
        let (manager, transport) = manager(store.clone());
        transport.push(&token_body(FIRST_ACCESS, Some(FIRST_REFRESH)));
        manager.access_token_at(Some("the-code"), 1292800000).unwrap();

        // Checkpoint itself is still within the validity window
        let access = manager
            .access_token_at(Some("ignored-code"), 1292922000 - 86400)
            .unwrap();

        assert_eq!(access, FIRST_ACCESS);
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_passed_checkpoint_refreshes_and_rewrites_cache() {
        let store = Arc::new(MemoryTokenStore::new());
        let (manager, transport) = manager(store.clone());
        transport.push(&token_body(FIRST_ACCESS, Some(FIRST_REFRESH)));
        manager.access_token_at(Some("the-code"), 1292800000).unwrap();

        transport.push(&token_body(SECOND_ACCESS, Some(SECOND_REFRESH)));
        let access = manager.access_token_at(None, 1292922000 - 86400 + 1).unwrap();

        assert_eq!(access, SECOND_ACCESS);
        assert_eq!(grant_type(&transport, 1), "refresh_token");
        assert!(transport.requests()[1]
            .query_pairs()
            .any(|(k, v)| k == "refresh_token" && v == FIRST_REFRESH));

        let cached = store.load().unwrap().unwrap();
        assert_eq!(cached.checkpoint, 1293008400 - 86400);
        assert_eq!(cached.refresh_token, SECOND_REFRESH);
    }

    #[test]
    fn test_refresh_without_new_refresh_token_keeps_old_one() {
        let store = Arc::new(MemoryTokenStore::new());
        store
            .save(&CachedToken {
                checkpoint: 0,
                access_token: FIRST_ACCESS.to_string(),
                refresh_token: FIRST_REFRESH.to_string(),
            })
            .unwrap();
        let (manager, transport) = manager(store.clone());
        transport.push(&token_body(SECOND_ACCESS, None));

        let access = manager.access_token_at(None, 10).unwrap();

        assert_eq!(access, SECOND_ACCESS);
        assert_eq!(store.load().unwrap().unwrap().refresh_token, FIRST_REFRESH);
    }

    #[test]
    fn test_provider_error_leaves_cache_untouched() {
        let store = Arc::new(MemoryTokenStore::new());
        let original = CachedToken {
            checkpoint: 0,
            access_token: FIRST_ACCESS.to_string(),
            refresh_token: FIRST_REFRESH.to_string(),
        };
        store.save(&original).unwrap();
        let (manager, transport) = manager(store.clone());
        transport.push(r#"{"error":"expired_token","error_description":"refresh token has been used"}"#);

        let result = manager.access_token_at(None, 10);

        assert!(matches!(result, Err(OAuthError::Provider { error, .. }) if error == "expired_token"));
        assert_eq!(store.load().unwrap(), Some(original));
    }

    #[test]
    fn test_force_refresh() {
        let store = Arc::new(MemoryTokenStore::new());
        let (manager, transport) = manager(store.clone());

        assert!(matches!(
            manager.force_refresh(),
            Err(OAuthError::NoCachedToken)
        ));

        transport.push(&token_body(FIRST_ACCESS, Some(FIRST_REFRESH)));
        manager.exchange_code("the-code").unwrap();
        transport.push(&token_body(SECOND_ACCESS, Some(SECOND_REFRESH)));

        let token = manager.force_refresh().unwrap();

        assert_eq!(token.access_token, SECOND_ACCESS);
        assert_eq!(grant_type(&transport, 1), "refresh_token");
    }

    #[test]
    fn test_file_cache_survives_new_manager() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("access_token.csv");

        let (first, transport) = manager(Arc::new(FileTokenStore::new(&path)));
        transport.push(&token_body(FIRST_ACCESS, Some(FIRST_REFRESH)));
        first.access_token_at(Some("the-code"), 1292800000).unwrap();

        let (second, transport) = manager(Arc::new(FileTokenStore::new(&path)));
        let access = second.access_token_at(None, 1292800001).unwrap();

        assert_eq!(access, FIRST_ACCESS);
        assert!(transport.requests().is_empty());

        second.logout().unwrap();
        assert!(second.cached().unwrap().is_none());
    }

    /// Store that is always empty and cannot be written
    struct ReadOnlyStore;

    impl TokenStore for ReadOnlyStore {
        fn load(&self) -> Result<Option<CachedToken>> {
            Ok(None)
        }

        fn save(&self, _token: &CachedToken) -> Result<()> {
            Err(OAuthError::CacheWrite {
                path: "/read-only/access_token.csv".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_cache_write_failure_is_fatal() {
        let (manager, transport) = manager(Arc::new(ReadOnlyStore));
        transport.push(&token_body(FIRST_ACCESS, Some(FIRST_REFRESH)));

        let result = manager.access_token_at(Some("the-code"), 1292800000);

        assert!(matches!(result, Err(OAuthError::CacheWrite { .. })));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(grant_type(&transport, 0), "authorization_code");
    }

    fn loopback_manager(
        store: Arc<MemoryTokenStore>,
    ) -> (TokenManager<ScriptedTransport, MemoryTokenStore>, ScriptedTransport) {
        // Reserve a free port for the redirect URI
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let transport = ScriptedTransport::new();
        let config = OAuthConfig::new("client", "secret")
            .with_redirect_uri(format!("http://127.0.0.1:{}/callback", port));
        let client = OAuthClient::with_transport(config, transport.clone());
        (TokenManager::new(client, store), transport)
    }

    /// Play the browser: follow the redirect with `code` and the given state
    fn redirect_from_thread(
        url: &Url,
        redirect_uri: &str,
        state: Option<String>,
    ) -> std::thread::JoinHandle<()> {
        let sent_state = state.unwrap_or_else(|| {
            url.query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default()
        });
        let callback = Url::parse(redirect_uri).unwrap();
        let addr = format!("127.0.0.1:{}", callback.port().unwrap());

        std::thread::spawn(move || {
            use std::io::{Read, Write};
            let mut stream = std::net::TcpStream::connect(addr).unwrap();
            write!(
                stream,
                "GET /callback?code=browser-code&state={} HTTP/1.1\r\nHost: localhost\r\n\r\n",
                sent_state
            )
            .unwrap();
            let mut response = String::new();
            let _ = stream.read_to_string(&mut response);
        })
    }

    #[test]
    fn test_login_exchanges_code_when_state_matches() {
        let store = Arc::new(MemoryTokenStore::new());
        let (manager, transport) = loopback_manager(store.clone());
        transport.push(&token_body(FIRST_ACCESS, Some(FIRST_REFRESH)));
        let redirect_uri = manager.client().config().redirect_uri.clone().unwrap();

        let mut browser = None;
        let token = manager
            .login_via_callback(Duration::from_secs(5), |url| {
                browser = Some(redirect_from_thread(url, &redirect_uri, None));
            })
            .unwrap();
        browser.unwrap().join().unwrap();

        assert_eq!(token.access_token, FIRST_ACCESS);
        assert_eq!(store.load().unwrap(), Some(token));
        assert!(transport.requests()[0]
            .query_pairs()
            .any(|(k, v)| k == "code" && v == "browser-code"));
    }

    #[test]
    fn test_login_rejects_tampered_state() {
        let store = Arc::new(MemoryTokenStore::new());
        let (manager, transport) = loopback_manager(store.clone());
        let redirect_uri = manager.client().config().redirect_uri.clone().unwrap();

        let mut browser = None;
        let result = manager.login_via_callback(Duration::from_secs(5), |url| {
            browser = Some(redirect_from_thread(url, &redirect_uri, Some("forged".into())));
        });
        browser.unwrap().join().unwrap();

        assert!(matches!(result, Err(OAuthError::InvalidState)));
        assert!(transport.requests().is_empty());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_login_rejects_oob_redirect() {
        let (manager, transport) = manager(Arc::new(MemoryTokenStore::new()));

        let result = manager.login_via_callback(Duration::from_secs(1), |_| {
            panic!("authorization page must not be opened")
        });

        assert!(matches!(result, Err(OAuthError::InvalidParameter(_))));
        assert!(transport.requests().is_empty());
    }
}
