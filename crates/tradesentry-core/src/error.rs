use thiserror::Error;

pub type SentryResult<T> = Result<T, SentryError>;

#[derive(Debug, Error)]
pub enum SentryError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("classifier contract violation: {0}")]
    ClassifierContract(String),

    #[error("consensus mismatch: {0}")]
    ConsensusMismatch(String),

    #[error("internal error: {0}")]
    Internal(String),
}
