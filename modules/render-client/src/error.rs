use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl From<reqwest::Error> for RenderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RenderError::Timeout
        } else {
            RenderError::Network(err.to_string())
        }
    }
}

impl RenderError {
    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RenderError::Network(_) | RenderError::Timeout => true,
            RenderError::Api { status, .. } => *status == 429 || *status >= 500,
        }
    }
}
