use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum TagError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("database error on {path}: {source}")]
    Database {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("rate limit exceeded for {endpoint}, try again later")]
    RateLimited { endpoint: String },
    #[error("config error: {message}")]
    Config { message: String },
}

impl TagError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TagError::RateLimited { .. })
    }
}
