use std::path::PathBuf;

/// The crate's typed error taxonomy. Every public fallible operation
/// returns `Result<T, ManifoldError>`; nothing here is retried internally —
/// callers decide whether a `KvUnavailable` at startup is fatal.
#[derive(Debug, thiserror::Error)]
pub enum ManifoldError {
    #[error("key/value store unavailable: {0}")]
    KvUnavailable(String),

    #[error("path not found: {path}")]
    PathNotFound {
        path: String,
        suggestions: Vec<String>,
    },

    #[error("input is shorter than the configured window ({bytes} < {window_bytes} bytes)")]
    TooShort { bytes: usize, window_bytes: usize },

    #[error("invalid signature string: {0:?}")]
    InvalidSignature(String),

    #[error("failed to parse {path}: {reason}")]
    ParseFailure { path: PathBuf, reason: String },

    #[error("I/O error reading {path}: {source}")]
    PerFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ManifoldError>;
