use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Profile slug selecting a built-in crawl target.
    pub target: String,

    /// Postgres DSN. Absent means the in-memory store (dry runs).
    pub database_url: Option<String>,

    /// Browser-render service, for targets that need script execution.
    pub render_url: Option<String>,
    pub render_token: Option<String>,

    /// OpenAI-compatible embeddings endpoint. Absent disables embedding.
    pub embed_api_key: Option<String>,
    pub embed_base_url: String,
    pub embed_model: String,

    /// Bearer-token auth for rate-limited APIs.
    pub auth_token_url: Option<String>,
    pub auth_client_id: Option<String>,
    pub auth_client_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            target: required_env("MAGPIE_TARGET"),
            database_url: env::var("DATABASE_URL").ok(),
            render_url: env::var("RENDER_URL").ok(),
            render_token: env::var("RENDER_TOKEN").ok(),
            embed_api_key: env::var("EMBED_API_KEY").ok(),
            embed_base_url: env::var("EMBED_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embed_model: env::var("EMBED_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            auth_token_url: env::var("AUTH_TOKEN_URL").ok(),
            auth_client_id: env::var("AUTH_CLIENT_ID").ok(),
            auth_client_secret: env::var("AUTH_CLIENT_SECRET").ok(),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
