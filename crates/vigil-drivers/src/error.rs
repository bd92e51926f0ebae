use thiserror::Error;
use vigil_core::ErrorCode;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Device rejected command: {0}")]
    Nak(String),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Map into the wire taxonomy. Anything transport-shaped collapses to
    /// `device_unreachable` — callers only care that the device didn't act.
    pub fn code(&self) -> ErrorCode {
        match self {
            DriverError::Unreachable(_)
            | DriverError::NotConnected
            | DriverError::Io(_)
            | DriverError::Timeout { .. } => ErrorCode::DeviceUnreachable,
            DriverError::Protocol(_) | DriverError::Nak(_) | DriverError::Serialization(_) => {
                ErrorCode::DeviceUnreachable
            }
            DriverError::InvalidArgument(_) => ErrorCode::InvalidParams,
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
