//! Interactive authorization step
//!
//! The user approves access in a browser; the developer portal then
//! redirects to our redirect URL with `?code=...`. `LoopbackFlow` listens on
//! 127.0.0.1 to catch that redirect.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::{form_urlencoded, Url};

use crate::error::{Error, Result};

/// Query parameter the authorization page reads the redirect target from.
pub const REDIRECT_PARAM: &str = "redirectUrl";

const CALLBACK_PATH: &str = "/callback";
const MAX_REQUEST_HEAD: usize = 8 * 1024;

#[async_trait]
pub trait AuthorizationFlow: Send + Sync {
    /// URL the authorization page should redirect back to.
    fn redirect_url(&self) -> String;

    /// Run the interactive step for `url`. `Ok(None)` means the user
    /// cancelled or never completed it.
    async fn launch(&self, url: &Url) -> Result<Option<String>>;
}

/// Authorization URL with the redirect parameter set (replacing any value
/// already present) and every other query parameter preserved.
///
/// The query is taken textually after the first `?`, so portals that route
/// inside the fragment (`https://host/#/authorized-app?cloudId=..`) get the
/// parameter where their router reads it.
pub fn authorization_url(auth_url: &str, redirect_url: &str) -> Result<Url> {
    let invalid =
        |detail: String| Error::Validation(format!("Invalid Authorization URL format: {}", detail));

    let trimmed = auth_url.trim();
    let parsed = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
    if parsed.cannot_be_a_base() {
        return Err(invalid(format!("{} is not a web address", trimmed)));
    }

    let (base, query) = trimmed.split_once('?').unwrap_or((trimmed, ""));
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    match pairs.iter().position(|(key, _)| key == REDIRECT_PARAM) {
        Some(first) => {
            pairs[first].1 = redirect_url.to_string();
            let mut index = 0;
            pairs.retain(|(key, _)| {
                let keep = key != REDIRECT_PARAM || index == first;
                index += 1;
                keep
            });
        }
        None => pairs.push((REDIRECT_PARAM.to_string(), redirect_url.to_string())),
    }

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    Url::parse(&format!("{}?{}", base, query)).map_err(|e| invalid(e.to_string()))
}

/// `code` query parameter of a redirect URL, if present and non-empty.
pub fn authorization_code(redirect: &str) -> Option<String> {
    let url = Url::parse(redirect.trim()).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .filter(|code| !code.is_empty())
}

/// Catches the redirect on a local port.
pub struct LoopbackFlow {
    listener: TcpListener,
    port: u16,
    timeout: Duration,
}

impl LoopbackFlow {
    /// Bind 127.0.0.1:`port` (0 picks a free port).
    pub async fn bind(port: u16, timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| Error::Transport(format!("Failed to listen on port {}: {}", port, e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::Transport(e.to_string()))?
            .port();
        Ok(Self {
            listener,
            port,
            timeout,
        })
    }

    async fn wait_for_redirect(&self) -> Result<String> {
        loop {
            let (mut stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            tracing::debug!("Redirect listener connection from {}", peer);

            let target = match read_request_target(&mut stream).await {
                Some(target) => target,
                None => continue,
            };

            if !target.starts_with(CALLBACK_PATH) {
                respond(&mut stream, "404 Not Found", "Not found").await;
                continue;
            }

            respond(
                &mut stream,
                "200 OK",
                "Authorization received. You can close this window.",
            )
            .await;
            return Ok(format!("http://127.0.0.1:{}{}", self.port, target));
        }
    }
}

#[async_trait]
impl AuthorizationFlow for LoopbackFlow {
    fn redirect_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, CALLBACK_PATH)
    }

    async fn launch(&self, url: &Url) -> Result<Option<String>> {
        eprintln!();
        eprintln!("To authorize, open this URL in your browser:");
        eprintln!("  {}", url);
        eprintln!();
        tracing::info!("Waiting for authorization redirect on port {}...", self.port);

        match tokio::time::timeout(self.timeout, self.wait_for_redirect()).await {
            Ok(result) => result.map(Some),
            Err(_) => {
                tracing::warn!("Timed out waiting for authorization redirect");
                Ok(None)
            }
        }
    }
}

/// For commands that never sign in interactively.
#[derive(Debug, Default)]
pub struct UnavailableFlow;

#[async_trait]
impl AuthorizationFlow for UnavailableFlow {
    fn redirect_url(&self) -> String {
        format!("http://127.0.0.1{}", CALLBACK_PATH)
    }

    async fn launch(&self, _url: &Url) -> Result<Option<String>> {
        tracing::warn!("Interactive sign-in is only available from 'login' and 'serve'");
        Ok(None)
    }
}

/// Request target from `GET <target> HTTP/1.1`.
fn parse_request_line(head: &str) -> Option<&str> {
    let line = head.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    (method == "GET" && target.starts_with('/')).then_some(target)
}

async fn read_request_target(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") && buf.len() < MAX_REQUEST_HEAD {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let head = String::from_utf8_lossy(&buf);
    parse_request_line(&head).map(str::to_string)
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        tracing::debug!("Failed to answer redirect request: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_url_appends_redirect() {
        let url = authorization_url("https://x/authorize", "http://127.0.0.1:8765/callback").unwrap();
        assert_eq!(
            url.as_str(),
            "https://x/authorize?redirectUrl=http%3A%2F%2F127.0.0.1%3A8765%2Fcallback"
        );
    }

    #[test]
    fn test_authorization_url_fragment_router() {
        let url = authorization_url(
            "https://web3.isolarcloud.com.hk/#/authorized-app?cloudId=3&applicationId=1",
            "http://127.0.0.1:8765/callback",
        )
        .unwrap();
        assert_eq!(
            url.fragment(),
            Some("/authorized-app?cloudId=3&applicationId=1&redirectUrl=http%3A%2F%2F127.0.0.1%3A8765%2Fcallback")
        );
    }

    #[test]
    fn test_authorization_url_replaces_existing_redirect() {
        let url = authorization_url(
            "https://x/authorize?redirectUrl=old&cloudId=3&redirectUrl=older",
            "http://127.0.0.1:8765/callback",
        )
        .unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (
                    "redirectUrl".to_string(),
                    "http://127.0.0.1:8765/callback".to_string()
                ),
                ("cloudId".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_authorization_url_rejects_garbage() {
        for bad in ["not a url", "/relative/path", "mailto:someone@example.com"] {
            match authorization_url(bad, "http://127.0.0.1/callback") {
                Err(Error::Validation(msg)) => {
                    assert!(msg.starts_with("Invalid Authorization URL format"))
                }
                other => panic!("expected validation error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_authorization_code_extraction() {
        assert_eq!(
            authorization_code("https://ext/redirect?code=ABC").as_deref(),
            Some("ABC")
        );
        assert_eq!(
            authorization_code("https://ext/redirect?state=1&code=A%2FB").as_deref(),
            Some("A/B")
        );
        assert!(authorization_code("https://ext/redirect?state=1").is_none());
        assert!(authorization_code("https://ext/redirect?code=").is_none());
        assert!(authorization_code("garbage").is_none());
    }

    #[test]
    fn test_parse_request_line() {
        assert_eq!(
            parse_request_line("GET /callback?code=X HTTP/1.1\r\nHost: a\r\n\r\n"),
            Some("/callback?code=X")
        );
        assert_eq!(parse_request_line("POST /callback HTTP/1.1\r\n"), None);
        assert_eq!(parse_request_line(""), None);
    }

    #[tokio::test]
    async fn test_loopback_captures_redirect() {
        let flow = LoopbackFlow::bind(0, Duration::from_secs(5)).await.unwrap();
        let redirect = flow.redirect_url();
        assert!(redirect.ends_with("/callback"));

        let visit = format!("{}?code=ABC", redirect);
        let browser = tokio::spawn(async move {
            let client = reqwest::Client::new();
            // a stray favicon request first, then the real redirect
            let base = visit.trim_end_matches("/callback?code=ABC").to_string();
            let favicon = client.get(format!("{}/favicon.ico", base)).send().await.unwrap();
            assert_eq!(favicon.status().as_u16(), 404);
            client.get(&visit).send().await.unwrap().status().as_u16()
        });

        let auth = Url::parse("https://x/authorize").unwrap();
        let got = flow.launch(&auth).await.unwrap().unwrap();
        assert_eq!(authorization_code(&got).as_deref(), Some("ABC"));
        assert_eq!(browser.await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_loopback_timeout_is_cancellation() {
        let flow = LoopbackFlow::bind(0, Duration::from_millis(50)).await.unwrap();
        let auth = Url::parse("https://x/authorize").unwrap();
        assert_eq!(flow.launch(&auth).await.unwrap(), None);
    }
}
