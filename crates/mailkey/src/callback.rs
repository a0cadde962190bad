//! Loopback listener for the `OAuth2` redirect.
//!
//! The provider sends the browser to the registered redirect URI with the
//! authorization code in the query. Requests for other paths (favicons and
//! the like) are answered with 404 and ignored.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};
use url::Url;

const DONE_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n\
                         Sign-in complete. You can close this tab.";
const FAILED_PAGE: &str = "HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n\
                           Sign-in failed. Return to the terminal for details.";
const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n";

/// How long a connection may take to send its request line.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// What one request to the listener carried.
#[derive(Debug, PartialEq, Eq)]
pub enum Redirect {
    /// Not the redirect path.
    Ignored,
    /// The authorization code, with the state already verified.
    Code(String),
    /// The provider reported an error, or the request was not trustworthy.
    Failed(String),
}

/// Parses the request target of a redirect, e.g. `/callback?code=...`.
pub fn parse_redirect(target: &str, expected_path: &str, expected_state: &str) -> Redirect {
    let Ok(url) = Url::parse(&format!("http://localhost{target}")) else {
        return Redirect::Ignored;
    };
    if url.path() != expected_path {
        return Redirect::Ignored;
    }

    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    if let Some(error) = param("error") {
        let description = param("error_description").unwrap_or_default();
        return Redirect::Failed(format!("provider returned {error}: {description}"));
    }
    if param("state").as_deref() != Some(expected_state) {
        return Redirect::Failed("state parameter does not match; ignoring the redirect".into());
    }
    match param("code") {
        Some(code) if !code.is_empty() => Redirect::Code(code),
        _ => Redirect::Failed("redirect carried no authorization code".into()),
    }
}

/// A bound listener waiting for the redirect.
#[derive(Debug)]
pub struct CallbackListener {
    listener: TcpListener,
    path: String,
    read_timeout: Duration,
}

impl CallbackListener {
    /// Binds the host and port of `redirect_uri`, which must be a loopback
    /// address.
    pub async fn bind(redirect_uri: &str) -> Result<Self> {
        let url = Url::parse(redirect_uri).context("invalid redirect URI")?;
        let host = match url.host_str() {
            Some("localhost" | "127.0.0.1") => "127.0.0.1",
            Some("[::1]") => "::1",
            other => bail!(
                "redirect URI host {} is not a loopback address",
                other.unwrap_or_default()
            ),
        };
        let port = url
            .port_or_known_default()
            .context("redirect URI has no port")?;

        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("failed to listen on {host}:{port}"))?;
        debug!(host, port, path = url.path(), "Waiting for OAuth redirect");
        Ok(Self {
            listener,
            path: url.path().to_string(),
            read_timeout: READ_TIMEOUT,
        })
    }

    /// Overrides how long a silent connection is waited on.
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Port actually bound; differs from the URI only when it asked for 0.
    pub fn port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accepts connections until one carries the redirect, then returns its
    /// authorization code.
    pub async fn wait_for_code(&self, expected_state: &str) -> Result<String> {
        loop {
            let (mut stream, peer) = self
                .listener
                .accept()
                .await
                .context("accepting redirect connection failed")?;

            let target =
                match tokio::time::timeout(self.read_timeout, read_target(&mut stream)).await {
                    Ok(Ok(target)) => target,
                    Ok(Err(e)) => {
                        warn!(%peer, "Unreadable request on redirect listener: {e}");
                        continue;
                    }
                    Err(_) => {
                        warn!(%peer, "Redirect connection sent nothing, dropping it");
                        continue;
                    }
                };

            match parse_redirect(&target, &self.path, expected_state) {
                Redirect::Ignored => {
                    let _ = stream.write_all(NOT_FOUND.as_bytes()).await;
                }
                Redirect::Code(code) => {
                    let _ = stream.write_all(DONE_PAGE.as_bytes()).await;
                    return Ok(code);
                }
                Redirect::Failed(reason) => {
                    let _ = stream.write_all(FAILED_PAGE.as_bytes()).await;
                    bail!(reason);
                }
            }
        }
    }
}

async fn read_target(stream: &mut TcpStream) -> Result<String> {
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let first_line = request.lines().next().unwrap_or_default();
    first_line
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
        .context("invalid HTTP request line")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn code_with_matching_state() {
        assert_eq!(
            parse_redirect("/callback?code=4%2F0Ab&state=xyz", "/callback", "xyz"),
            Redirect::Code("4/0Ab".into())
        );
    }

    #[test]
    fn other_paths_are_ignored() {
        assert_eq!(
            parse_redirect("/favicon.ico", "/callback", "xyz"),
            Redirect::Ignored
        );
    }

    #[test]
    fn state_mismatch_fails() {
        let outcome = parse_redirect("/callback?code=abc&state=evil", "/callback", "xyz");
        assert!(matches!(outcome, Redirect::Failed(reason) if reason.contains("state")));
    }

    #[test]
    fn provider_error_is_reported() {
        let outcome = parse_redirect(
            "/callback?error=access_denied&error_description=User+cancelled&state=xyz",
            "/callback",
            "xyz",
        );
        assert_eq!(
            outcome,
            Redirect::Failed("provider returned access_denied: User cancelled".into())
        );
    }

    #[tokio::test]
    async fn silent_connection_does_not_block_the_redirect() {
        let listener = CallbackListener::bind("http://localhost:0/callback")
            .await
            .unwrap()
            .with_read_timeout(Duration::from_millis(50));
        let port = listener.port().unwrap();

        let browser = tokio::spawn(async move {
            let _silent = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            stream
                .write_all(b"GET /callback?code=late&state=s1 HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        });

        let code = tokio::time::timeout(Duration::from_secs(5), listener.wait_for_code("s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, "late");
        assert!(browser.await.unwrap().starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn listener_returns_code_after_ignoring_stray_requests() {
        let listener = CallbackListener::bind("http://localhost:0/callback")
            .await
            .unwrap();
        let port = listener.port().unwrap();

        let browser = tokio::spawn(async move {
            for target in ["/favicon.ico", "/callback?code=the-code&state=s1"] {
                let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
                let request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
                stream.write_all(request.as_bytes()).await.unwrap();
                let mut response = String::new();
                stream.read_to_string(&mut response).await.unwrap();
            }
        });

        let code = listener.wait_for_code("s1").await.unwrap();
        assert_eq!(code, "the-code");
        browser.await.unwrap();
    }
}
