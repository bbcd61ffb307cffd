//! Probe error type.

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("stream error: {0}")]
    Stream(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
