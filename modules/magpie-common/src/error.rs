use thiserror::Error;

#[derive(Error, Debug)]
pub enum MagpieError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// How a failed fetch should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Timeouts, 5xx, rate-limit signals. Worth retrying with backoff.
    Transient,
    /// 404s, malformed URLs, shape mismatches. Retrying will not fix these.
    Permanent,
}

#[derive(Error, Debug)]
#[error("fetch failed ({kind}): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchErrorKind::Transient => write!(f, "transient"),
            FetchErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FetchErrorKind::Transient
    }
}

/// Errors at the persistence gateway boundary. The gateway owns uniqueness
/// enforcement; a duplicate-key conflict is a per-item outcome, not a run
/// failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("store backend error: {0}")]
    Backend(String),
}
