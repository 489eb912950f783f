/// Authorization request (step one of the authorization code flow)
use crate::config::{OAuthConfig, DEFAULT_SCOPE};
use crate::error::{OAuthError, Result};
use rand::Rng;
use url::Url;

/// Style of the provider's login and consent pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Display {
    /// Full page, the default
    #[default]
    Page,
    Popup,
    Touch,
    Mobile,
    Tv,
    Pad,
}

impl Display {
    pub fn as_str(&self) -> &'static str {
        match self {
            Display::Page => "page",
            Display::Popup => "popup",
            Display::Touch => "touch",
            Display::Mobile => "mobile",
            Display::Tv => "tv",
            Display::Pad => "pad",
        }
    }
}

impl std::str::FromStr for Display {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "page" => Ok(Display::Page),
            "popup" => Ok(Display::Popup),
            "touch" => Ok(Display::Touch),
            "mobile" => Ok(Display::Mobile),
            "tv" => Ok(Display::Tv),
            "pad" => Ok(Display::Pad),
            other => Err(OAuthError::InvalidParameter(format!(
                "unknown display style: {}",
                other
            ))),
        }
    }
}

/// Parameters of the redirect to the authorization endpoint
///
/// Optional parameters that are unset are still sent, with an empty value.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub response_type: String,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub display: Display,
    pub force_login: bool,
    pub confirm_login: bool,
}

impl Default for AuthorizationRequest {
    fn default() -> Self {
        Self {
            response_type: "code".to_string(),
            redirect_uri: None,
            scope: Some(DEFAULT_SCOPE.to_string()),
            state: None,
            display: Display::Page,
            force_login: false,
            confirm_login: false,
        }
    }
}

impl AuthorizationRequest {
    /// Create a request using the redirect URI and scope of `config`
    pub fn from_config(config: &OAuthConfig) -> Self {
        Self {
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope.clone(),
            ..Self::default()
        }
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Attach a random `state`, echoed back on the redirect to guard against CSRF
    pub fn with_random_state(self) -> Self {
        let mut rng = rand::thread_rng();
        let state_bytes: [u8; 16] = rng.gen();
        let state: String = state_bytes.iter().map(|b| format!("{:02x}", b)).collect();
        self.with_state(state)
    }

    pub fn with_display(mut self, display: Display) -> Self {
        self.display = display;
        self
    }

    /// Always ask for credentials instead of reusing the provider's login cookie
    pub fn with_force_login(mut self, force_login: bool) -> Self {
        self.force_login = force_login;
        self
    }

    /// Ask an already logged-in user to confirm the account used for consent
    pub fn with_confirm_login(mut self, confirm_login: bool) -> Self {
        self.confirm_login = confirm_login;
        self
    }

    /// Build the URL to send the user agent to
    pub fn build_url(&self, authorize_endpoint: &Url, client_id: &str) -> Result<Url> {
        let redirect_uri = self
            .redirect_uri
            .as_deref()
            .ok_or_else(|| OAuthError::MissingField("redirect_uri".into()))?;

        let mut url = authorize_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("response_type", &self.response_type)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", self.scope.as_deref().unwrap_or(""))
            .append_pair("state", self.state.as_deref().unwrap_or(""))
            .append_pair("display", self.display.as_str())
            .append_pair("force_login", flag(self.force_login))
            .append_pair("confirm_login", flag(self.confirm_login));

        Ok(url)
    }
}

fn flag(enabled: bool) -> &'static str {
    if enabled {
        "1"
    } else {
        ""
    }
}

/// Send the user agent to `url` by opening the system browser
pub fn open_in_browser(url: &Url) -> Result<()> {
    tracing::info!("opening browser for authorization");
    webbrowser::open(url.as_str())?;
    Ok(())
}
