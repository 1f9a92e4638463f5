use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipeError {
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP error {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decoding(String),

    #[error("Record has no value for identifier field '{0}'")]
    MissingIdentifier(String),

    #[error("Multipart encoding failed: {0}")]
    MultipartEncoding(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Store not found: {0}")]
    StoreNotFound(String),
}

impl PipeError {
    /// The request reached its deadline without a response.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PipeError::Timeout(_))
    }

    /// The owning pipe cancelled the request before it completed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipeError::Cancelled)
    }

    /// HTTP status of a non-2xx response, if that is what failed.
    pub fn status(&self) -> Option<u16> {
        match self {
            PipeError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipeError>;

impl From<reqwest::Error> for PipeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PipeError::Decoding(err.to_string())
        } else {
            PipeError::NetworkUnreachable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PipeError {
    fn from(err: serde_json::Error) -> Self {
        PipeError::Decoding(err.to_string())
    }
}
