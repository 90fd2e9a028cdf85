use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid library pattern: {0}")]
    Regex(#[from] regex::Error),

    /// Mandatory source fields are absent or malformed.
    #[error("decode error: {0}")]
    Decode(String),

    /// A decoded record cannot be expressed in KiCad syntax.
    #[error("format error: {0}")]
    Format(String),

    #[error("missing expected data: {0}")]
    MissingData(String),

    #[error("batch export failed: {0}")]
    Batch(String),
}

pub type Result<T> = std::result::Result<T, Error>;
