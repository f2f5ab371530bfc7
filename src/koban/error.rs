use thiserror::Error;

use super::transport::TransportError;

/// Errors surfaced by [`super::KobanClient`] calls.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KobanError {
    /// 404 from Koban. Final: callers decide what "not found" means.
    #[error("Koban resource not found")]
    NotFound,

    #[error("Koban answered with an HTML page")]
    HtmlResponse,

    #[error("Koban request failed with status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Koban response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Koban did not return a PDF document")]
    NotAPdf,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Well-formed answer with `Success` not true.
    #[error("Koban rejected the request: {0}")]
    Rejected(String),

    #[error("Koban response has no usable Result")]
    MissingResult,
}

impl KobanError {
    /// Whether another attempt of the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            KobanError::NotFound | KobanError::Rejected(_) | KobanError::MissingResult
        )
    }
}
