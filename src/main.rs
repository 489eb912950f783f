use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::error;

use pcs_token::prelude::*;

/// Obtain, cache, and refresh Baidu PCS OAuth 2.0 access tokens.
#[derive(Debug, Parser)]
#[command(name = "pcs-token", version)]
struct Cli {
    /// API key of the registered application.
    #[arg(long, env = "PCS_CLIENT_ID")]
    client_id: String,

    /// Secret key of the registered application.
    #[arg(long, env = "PCS_CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    /// Redirect URI registered for the application, or `oob`. `login` needs
    /// an `http://` loopback URI such as `http://127.0.0.1:8080/callback`.
    #[arg(long, default_value = "oob", env = "PCS_REDIRECT_URI")]
    redirect_uri: String,

    /// Space separated scope list.
    #[arg(long, default_value = "netdisk", env = "PCS_SCOPE")]
    scope: String,

    /// OAuth 2.0 base URL.
    #[arg(long, default_value = pcs_token::config::DEFAULT_BASE_URL, env = "PCS_OAUTH_BASE_URL")]
    base_url: String,

    /// Token cache file. Defaults to `<data dir>/pcs-token/access_token.csv`.
    #[arg(long, env = "PCS_CACHE_FILE")]
    cache_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the authorization URL.
    Url {
        #[arg(long)]
        state: Option<String>,
        /// page, popup, touch, mobile, tv or pad.
        #[arg(long, default_value = "page")]
        display: String,
        #[arg(long)]
        force_login: bool,
        #[arg(long)]
        confirm_login: bool,
    },
    /// Authorize in the browser through a local callback listener.
    ///
    /// Requires `--redirect-uri` to be an `http://` loopback URI.
    Login {
        /// Seconds to wait for the redirect.
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Exchange an authorization code and cache the token.
    Exchange { code: String },
    /// Print a valid access token, refreshing the cache when due.
    Token,
    /// Refresh the cached token now.
    Refresh,
    /// Show the cached token record.
    Show,
    /// Delete the token cache.
    Logout,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(cli) {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = OAuthConfig::new(cli.client_id, cli.client_secret)
        .with_base_url(&cli.base_url)
        .context("invalid base URL")?
        .with_redirect_uri(cli.redirect_uri)
        .with_scope(cli.scope);

    let store = match cli.cache_file {
        Some(path) => FileTokenStore::new(path),
        None => FileTokenStore::for_app("pcs-token").context("no data directory for the token cache")?,
    };
    tracing::debug!(path = %store.path().display(), "token cache");

    let client = OAuthClient::new(config)?;
    let manager = TokenManager::new(client, Arc::new(store));

    match cli.command {
        Command::Url {
            state,
            display,
            force_login,
            confirm_login,
        } => {
            let mut request = AuthorizationRequest::from_config(manager.client().config())
                .with_display(display.parse()?)
                .with_force_login(force_login)
                .with_confirm_login(confirm_login);
            if let Some(state) = state {
                request = request.with_state(state);
            }
            println!("{}", manager.client().authorization_url(&request)?);
        }
        Command::Login { timeout } => {
            let token = manager.login_with_browser(Duration::from_secs(timeout), |url| {
                eprintln!("Open this URL to authorize:\n{}", url);
            })?;
            println!("{}", token.access_token);
        }
        Command::Exchange { code } => {
            let token = manager
                .exchange_code(&code)
                .context("authorization code exchange failed")?;
            println!("{}", token.access_token);
        }
        Command::Token => match manager.access_token(None) {
            Ok(access_token) => println!("{}", access_token),
            Err(OAuthError::AuthorizationRequired { url }) => {
                eprintln!("No cached token. Authorize here, then run `pcs-token exchange <CODE>`:");
                eprintln!("{}", url);
                std::process::exit(2);
            }
            Err(e) => return Err(e.into()),
        },
        Command::Refresh => {
            let token = manager.force_refresh().context("token refresh failed")?;
            println!("{}", token.access_token);
        }
        Command::Show => match manager.cached()? {
            Some(token) => {
                println!("checkpoint:    {}", token.checkpoint);
                println!("access_token:  {}", token.access_token);
                println!("refresh_token: {}", token.refresh_token);
                println!(
                    "needs_refresh: {}",
                    token.needs_refresh(pcs_token::token::unix_now())
                );
            }
            None => println!("no cached token"),
        },
        Command::Logout => manager.logout()?,
    }

    Ok(())
}
