use chrono::Utc;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use magpie_common::{FetchError, RawPage};
use render_client::RenderClient;

use crate::traits::{FetchOptions, PageFetcher};

// --- Plain HTTP fetcher ---

/// Client-credentials auth for sources that rate-limit anonymous access.
/// Tokens are acquired lazily and refreshed transparently on a 401.
pub struct BearerAuth {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

pub struct HttpFetcher {
    client: reqwest::Client,
    auth: Option<BearerAuth>,
    token: RwLock<Option<String>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("magpie-crawler/0.1")
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            auth: None,
            token: RwLock::new(None),
        }
    }

    pub fn with_auth(mut self, auth: BearerAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    async fn authenticate(&self) -> Result<String, FetchError> {
        let auth = self
            .auth
            .as_ref()
            .ok_or_else(|| FetchError::permanent("no credentials configured"))?;

        let body = serde_json::json!({
            "grant_type": "client_credentials",
            "client_id": auth.client_id,
            "client_secret": auth.client_secret,
        });

        let resp = self
            .client
            .post(&auth.token_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::transient(format!("token request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(FetchError::permanent(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::permanent(format!("malformed token response: {e}")))?;

        *self.token.write().await = Some(token.access_token.clone());
        info!("Bearer token acquired");
        Ok(token.access_token)
    }

    async fn current_token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    async fn send(
        &self,
        url: &str,
        options: &FetchOptions,
        token: Option<&str>,
    ) -> Result<reqwest::Response, FetchError> {
        let mut req = self.client.get(url).timeout(options.timeout);
        for (name, value) in &options.headers {
            req = req.header(name, value);
        }
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }

        req.send().await.map_err(|e| {
            if e.is_builder() {
                FetchError::permanent(format!("request build failed: {e}"))
            } else if e.is_timeout() {
                FetchError::transient(format!("timed out: {e}"))
            } else {
                FetchError::transient(format!("request failed: {e}"))
            }
        })
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn acquire(&self) -> Result<(), FetchError> {
        if self.auth.is_some() {
            self.authenticate().await?;
        }
        Ok(())
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawPage, FetchError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| FetchError::permanent(format!("malformed URL {url}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::permanent(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let mut token = self.current_token().await;
        let mut resp = self.send(url, options, token.as_deref()).await?;

        // One transparent refresh on an expired token, then give up.
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED && self.auth.is_some() {
            debug!(url, "401 received, refreshing bearer token");
            token = Some(self.authenticate().await?);
            resp = self.send(url, options, token.as_deref()).await?;
        }

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16()));
        }

        let content = resp
            .text()
            .await
            .map_err(|e| FetchError::transient(format!("body read failed: {e}")))?;

        debug!(url, bytes = content.len(), "Fetched");
        Ok(RawPage {
            url: url.to_string(),
            content,
            fetched_at: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Rate-limit signals and server errors are worth retrying; everything
/// else in the 4xx range is not.
fn classify_status(status: u16) -> FetchError {
    if status == 429 || status >= 500 {
        FetchError::transient(format!("status {status}"))
    } else {
        FetchError::permanent(format!("status {status}"))
    }
}

// --- Browser-rendered fetcher ---

pub struct RenderFetcher {
    client: RenderClient,
}

impl RenderFetcher {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        info!(base_url, "Using render service for scripted pages");
        Self {
            client: RenderClient::new(base_url, token),
        }
    }
}

#[async_trait]
impl PageFetcher for RenderFetcher {
    async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<RawPage, FetchError> {
        let content = self.client.render(url).await.map_err(|e| {
            if e.is_transient() {
                FetchError::transient(e.to_string())
            } else {
                FetchError::permanent(e.to_string())
            }
        })?;

        Ok(RawPage {
            url: url.to_string(),
            content,
            fetched_at: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "render"
    }
}

// --- Dispatching fetcher ---

/// Routes each request by its `render` flag. Without a configured render
/// service, rendered requests degrade to a plain fetch — the extractor
/// will report NoContent for script-built pages rather than the run
/// failing outright.
pub struct DualFetcher {
    http: HttpFetcher,
    render: Option<RenderFetcher>,
}

impl DualFetcher {
    pub fn new(http: HttpFetcher, render: Option<RenderFetcher>) -> Self {
        Self { http, render }
    }
}

#[async_trait]
impl PageFetcher for DualFetcher {
    async fn acquire(&self) -> Result<(), FetchError> {
        self.http.acquire().await
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawPage, FetchError> {
        if options.render {
            match &self.render {
                Some(render) => return render.fetch(url, options).await,
                None => warn!(url, "Render requested but no render service configured, plain fetch"),
            }
        }
        self.http.fetch(url, options).await
    }

    fn name(&self) -> &str {
        "dual"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_common::FetchErrorKind;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert_eq!(classify_status(429).kind, FetchErrorKind::Transient);
        assert_eq!(classify_status(500).kind, FetchErrorKind::Transient);
        assert_eq!(classify_status(503).kind, FetchErrorKind::Transient);
    }

    #[test]
    fn client_errors_are_permanent() {
        assert_eq!(classify_status(404).kind, FetchErrorKind::Permanent);
        assert_eq!(classify_status(410).kind, FetchErrorKind::Permanent);
        assert_eq!(classify_status(403).kind, FetchErrorKind::Permanent);
    }

    #[tokio::test]
    async fn malformed_urls_fail_permanently() {
        let fetcher = HttpFetcher::new();
        let options = FetchOptions {
            timeout: std::time::Duration::from_secs(1),
            headers: vec![],
            render: false,
        };
        let err = fetcher.fetch("not a url", &options).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Permanent);

        let err = fetcher.fetch("ftp://example.org/x", &options).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Permanent);
    }
}
