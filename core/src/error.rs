//! Error types shared across the check execution & distribution engine.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(String),

    #[error("check {0} not found")]
    CheckNotFound(i64),

    #[error("probe not found for region '{0}'")]
    ProbeNotFound(String),

    #[error("invalid token")]
    InvalidToken,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported check type: {0}")]
    UnsupportedCheckType(String),
}

pub type Result<T> = std::result::Result<T, Error>;
