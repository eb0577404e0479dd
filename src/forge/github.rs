use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::forge::client::{ForgeClient, ForgeError};
use crate::forge::routes::{self, Route};
use crate::safety::Params;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// GitHub REST client for the administrative operations
pub struct GitHubClient {
    base: Url,
    token: Option<String>,
    http_client: Client,
    initial_backoff: Duration,
}

impl GitHubClient {
    pub fn new(api_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, ForgeError> {
        let base = Url::parse(api_url).map_err(|e| ForgeError::InvalidUrl(format!("{}: {}", api_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ForgeError::InvalidUrl(api_url.to_string()));
        }

        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base,
            token,
            http_client,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ForgeError> {
        let token = settings.get_token();
        if token.is_none() {
            warn!(
                env = %settings.forge.token_env,
                "no forge token configured, requests will be unauthenticated"
            );
        }
        Self::new(
            &settings.forge.api_url,
            token,
            Duration::from_secs(settings.forge.timeout_seconds),
        )
    }

    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    fn url(&self, route: &Route) -> Result<Url, ForgeError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ForgeError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(&route.segments);
        Ok(url)
    }

    /// Send `route`, retrying rate limits and, for idempotent methods,
    /// server errors
    async fn send(&self, route: &Route) -> Result<Value, ForgeError> {
        let url = self.url(route)?;
        let idempotent = matches!(route.method, Method::GET | Method::PUT | Method::DELETE);

        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            attempt += 1;

            let mut request = self
                .http_client
                .request(route.method.clone(), url.clone())
                .header(ACCEPT, "application/vnd.github+json")
                .header("X-GitHub-Api-Version", API_VERSION)
                .header(USER_AGENT, concat!("gitwarden/", env!("CARGO_PKG_VERSION")));
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = &route.body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_connect() && attempt < MAX_RETRIES => {
                    warn!(error = %e, attempt, "forge unreachable, retrying in {}ms", backoff.as_millis());
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status.is_success() {
                let text = response.text().await?;
                if text.trim().is_empty() {
                    return Ok(json!({"status": status.as_u16()}));
                }
                return Ok(serde_json::from_str(&text)?);
            }

            let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
                || (status == StatusCode::FORBIDDEN
                    && response
                        .headers()
                        .get("x-ratelimit-remaining")
                        .is_some_and(|v| v == "0"));

            if rate_limited {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

                if attempt >= MAX_RETRIES {
                    return Err(ForgeError::RateLimitExceeded(retry_after));
                }

                let wait = Duration::from_secs(retry_after).max(backoff);
                warn!(attempt, max = MAX_RETRIES, "rate limited, retrying in {}ms", wait.as_millis());
                tokio::time::sleep(wait).await;
                backoff *= 2;
                continue;
            }

            if status.is_server_error() && idempotent && attempt < MAX_RETRIES {
                warn!(%status, attempt, "forge error, retrying in {}ms", backoff.as_millis());
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);

            if status == StatusCode::NOT_FOUND {
                return Err(ForgeError::NotFound(route.path()));
            }
            return Err(ForgeError::ApiError {
                status: status.as_u16(),
                message,
            });
        }
    }
}

#[async_trait]
impl ForgeClient for GitHubClient {
    async fn call(&self, operation: &str, params: &Params) -> Result<Value, ForgeError> {
        let route = routes::route(operation, params)?;
        debug!(operation, method = %route.method, path = %route.path(), "forge request");

        // Membership is answered by status code alone
        if operation == "check_collaborator" {
            let username = params.get("username").cloned().unwrap_or(Value::Null);
            return match self.send(&route).await {
                Ok(_) => Ok(json!({"username": username, "is_collaborator": true})),
                Err(ForgeError::NotFound(_)) => {
                    Ok(json!({"username": username, "is_collaborator": false}))
                }
                Err(e) => Err(e),
            };
        }

        self.send(&route).await
    }

    async fn snapshot(&self, operation: &str, params: &Params) -> Result<Option<Value>, ForgeError> {
        let Some(route) = routes::snapshot_route(operation, params)? else {
            return Ok(None);
        };

        match self.send(&route).await {
            Ok(state) => Ok(Some(state)),
            // Nothing there yet is itself the prior state
            Err(ForgeError::NotFound(_)) => Ok(Some(Value::Null)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned `(status, body)` responses in order, one per connection,
    /// recording each request's head and body
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();

                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let head_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
                let length = head
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                while buf.len() < head_end + length {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                }
                let request_body = String::from_utf8_lossy(&buf[head_end..]).to_string();
                log.lock().push(format!("{}{}", head, request_body));

                let response = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (format!("http://{}", addr), seen)
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    fn client(url: &str) -> GitHubClient {
        GitHubClient::new(url, Some("ghp_test".to_string()), Duration::from_secs(5))
            .unwrap()
            .with_backoff(Duration::from_millis(1))
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            GitHubClient::new("not a url", None, Duration::from_secs(1)),
            Err(ForgeError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_url_joins_under_base_path() {
        let client = GitHubClient::new(
            "https://ghe.example.com/api/v3",
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        let route = routes::route(
            "get_branch_protection",
            &params(json!({"owner": "acme", "repo": "demo", "branch": "release/1.0"})),
        )
        .unwrap();

        assert_eq!(
            client.url(&route).unwrap().as_str(),
            "https://ghe.example.com/api/v3/repos/acme/demo/branches/release%2F1.0/protection"
        );
    }

    #[tokio::test]
    async fn test_call_sends_headers_and_body() {
        let (url, seen) = serve(vec![(200, r#"{"permission":"push"}"#)]).await;

        let result = client(&url)
            .call(
                "add_collaborator",
                &params(json!({
                    "owner": "acme", "repo": "demo", "username": "alice",
                    "permission": "push", "dry_run": false
                })),
            )
            .await
            .unwrap();
        assert_eq!(result["permission"], json!("push"));

        let request = seen.lock()[0].clone();
        assert!(request.starts_with("PUT /repos/acme/demo/collaborators/alice HTTP/1.1"));
        let lower = request.to_lowercase();
        assert!(lower.contains("authorization: bearer ghp_test"));
        assert!(lower.contains("accept: application/vnd.github+json"));
        assert!(request.ends_with(r#"{"permission":"push"}"#));
    }

    #[tokio::test]
    async fn test_empty_success_body() {
        let (url, _seen) = serve(vec![(204, "")]).await;

        let result = client(&url)
            .call("delete_webhook", &params(json!({"owner": "acme", "repo": "demo", "hook_id": 1})))
            .await
            .unwrap();
        assert_eq!(result, json!({"status": 204}));
    }

    #[tokio::test]
    async fn test_retries_server_errors_for_idempotent_requests() {
        let (url, seen) = serve(vec![(502, "{}"), (503, "{}"), (200, "[]")]).await;

        let result = client(&url)
            .call("list_webhooks", &params(json!({"owner": "acme", "repo": "demo"})))
            .await
            .unwrap();
        assert_eq!(result, json!([]));
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_post_is_not_retried() {
        let (url, seen) = serve(vec![(500, r#"{"message":"boom"}"#)]).await;

        let result = client(&url)
            .call(
                "create_webhook",
                &params(json!({"owner": "acme", "repo": "demo", "url": "https://hooks.example.com"})),
            )
            .await;
        assert!(matches!(
            result,
            Err(ForgeError::ApiError { status: 500, ref message }) if message == "boom"
        ));
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_check_collaborator_maps_status() {
        let (url, _seen) = serve(vec![(204, ""), (404, r#"{"message":"Not Found"}"#)]).await;
        let client = client(&url);
        let p = params(json!({"owner": "acme", "repo": "demo", "username": "alice"}));

        let yes = client.call("check_collaborator", &p).await.unwrap();
        assert_eq!(yes["is_collaborator"], json!(true));

        let no = client.call("check_collaborator", &p).await.unwrap();
        assert_eq!(no["is_collaborator"], json!(false));
    }

    #[tokio::test]
    async fn test_snapshot() {
        let (url, seen) = serve(vec![(200, r#"{"id":7,"active":true}"#)]).await;
        let client = client(&url);
        let p = params(json!({"owner": "acme", "repo": "demo", "hook_id": 7}));

        let snapshot = client.snapshot("delete_webhook", &p).await.unwrap();
        assert_eq!(snapshot, Some(json!({"id": 7, "active": true})));
        assert!(seen.lock()[0].starts_with("GET /repos/acme/demo/hooks/7 "));

        assert_eq!(client.snapshot("list_webhooks", &p).await.unwrap(), None);
    }
}
