/// Local HTTP listener that captures the authorization redirect
use crate::error::{OAuthError, Result};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use url::Url;

/// Query parameters delivered to the redirect URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResult {
    pub code: String,
    pub state: Option<String>,
}

/// Loopback server standing in for the redirect URI's web server
pub struct CallbackServer {
    listener: TcpListener,
    path: String,
}

impl CallbackServer {
    /// Listen on `addr` and accept redirects to `path`
    pub fn bind(addr: impl ToSocketAddrs, path: impl Into<String>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        // Polled so that `wait_for_callback` can honour its deadline
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            path: path.into(),
        })
    }

    /// Listen on the host and port of an `http://` redirect URI
    pub fn for_redirect_uri(redirect_uri: &str) -> Result<Self> {
        let url = Url::parse(redirect_uri)?;
        if url.scheme() != "http" {
            return Err(OAuthError::InvalidParameter(format!(
                "callback server needs an http:// redirect URI, got {}",
                redirect_uri
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| OAuthError::MissingField("redirect_uri host".into()))?;
        let port = url.port_or_known_default().unwrap_or(80);

        Self::bind((host, port), url.path())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Redirect URI matching this listener
    pub fn redirect_uri(&self) -> Result<String> {
        Ok(format!("http://{}{}", self.local_addr()?, self.path))
    }

    /// Wait for the redirect carrying the authorization code
    ///
    /// Requests to other paths are answered with an error page and ignored.
    /// A connection that stalls or fails is dropped without ending the wait;
    /// `timeout` bounds the whole wait, reads included.
    pub fn wait_for_callback(&self, timeout: Duration) -> Result<CallbackResult> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(OAuthError::InvalidResponse(
                    "Timeout waiting for callback".into(),
                ));
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "callback connection");
                    match self.handle_request(stream, remaining) {
                        Ok(Some(result)) => return Ok(result),
                        Ok(None) => {}
                        Err(OAuthError::IoError(e)) => {
                            tracing::warn!(%peer, "dropping callback connection: {}", e);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn handle_request(
        &self,
        stream: TcpStream,
        read_timeout: Duration,
    ) -> Result<Option<CallbackResult>> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(read_timeout))?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let mut request_line = String::new();
        reader.read_line(&mut request_line)?;

        // Drain headers so closing the socket does not reset the connection
        let mut header = String::new();
        while reader.read_line(&mut header)? > 0 && !header.trim().is_empty() {
            header.clear();
        }

        // GET /callback?code=...&state=... HTTP/1.1
        let target = match request_line.split_whitespace().nth(1) {
            Some(target) => target,
            None => {
                send_response(stream, "400 Bad Request", "Invalid request")?;
                return Ok(None);
            }
        };

        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        if path != self.path {
            send_response(stream, "404 Not Found", "Not found")?;
            return Ok(None);
        }

        let params = parse_query_params(query);

        if let Some(error) = params.get("error") {
            send_response(stream, "400 Bad Request", &format!("Authorization failed: {}", error))?;
            if error == "access_denied" {
                return Err(OAuthError::AuthorizationDenied);
            }
            return Err(OAuthError::Provider {
                error: error.clone(),
                description: params.get("error_description").cloned(),
            });
        }

        let code = match params.get("code") {
            Some(code) if !code.is_empty() => code.clone(),
            _ => {
                send_response(stream, "400 Bad Request", "Missing authorization code")?;
                return Ok(None);
            }
        };

        send_response(
            stream,
            "200 OK",
            "Authorization successful. You can close this window and return to your terminal.",
        )?;

        Ok(Some(CallbackResult {
            code,
            state: params.get("state").filter(|s| !s.is_empty()).cloned(),
        }))
    }
}

fn parse_query_params(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn send_response(mut stream: TcpStream, status: &str, message: &str) -> Result<()> {
    let html = format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>pcs-token</title></head>\n<body><p>{}</p></body>\n</html>",
        message
    );

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        html.len(),
        html
    );

    stream.write_all(response.as_bytes())?;
    stream.flush()?;
    Ok(())
}
