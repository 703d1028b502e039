pub mod error;

pub use error::{RenderError, Result};

use std::time::Duration;

use tracing::debug;

/// Client for a browser-render service: POST /render with a URL, get back
/// the DOM after scripts have run. Used for sources whose listings and
/// articles are built client-side.
pub struct RenderClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    wait_ms: u64,
}

impl RenderClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(45))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            wait_ms: 1_500,
        }
    }

    /// Extra settle time after load before the DOM is captured.
    pub fn with_wait_ms(mut self, wait_ms: u64) -> Self {
        self.wait_ms = wait_ms;
        self
    }

    /// Fetch fully-rendered HTML for a URL.
    pub async fn render(&self, url: &str) -> Result<String> {
        let mut endpoint = format!("{}/render", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let body = serde_json::json!({
            "url": url,
            "waitMs": self.wait_ms,
        });

        debug!(url, "Requesting rendered DOM");

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RenderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }
}
