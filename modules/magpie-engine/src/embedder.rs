use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::traits::TextEmbedder;

/// Embeddings via an OpenAI-compatible `/embeddings` endpoint. Embedding
/// is best-effort everywhere it is used — a failed call never blocks a
/// record from persisting.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        info!(base_url, model, "Using HTTP embedder");
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl TextEmbedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Embedding request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("Embedding endpoint returned {status}");
        }

        let mut data: EmbeddingResponse = resp
            .json()
            .await
            .context("Failed to parse embedding response")?;

        data.data
            .pop()
            .map(|item| item.embedding)
            .ok_or_else(|| anyhow::anyhow!("Embedding response was empty"))
    }
}
