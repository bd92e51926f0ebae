use thiserror::Error;
use vigil_core::ErrorCode;
use vigil_drivers::DriverError;

/// Errors surfaced on `command_result.error`. The relay never translates
/// these into socket closes — they ride back to the operator as text.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Missing or invalid parameter: {field}")]
    InvalidParams { field: &'static str },

    #[error("Device not configured: {device}")]
    DeviceNotConfigured { device: &'static str },

    #[error("Unknown command: {name}")]
    UnknownCommand { name: String },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AgentError::InvalidParams { .. } => ErrorCode::InvalidParams,
            AgentError::DeviceNotConfigured { .. } => ErrorCode::DeviceNotConfigured,
            AgentError::UnknownCommand { .. } => ErrorCode::NotFound,
            AgentError::Driver(e) => e.code(),
            AgentError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// The string placed in `command_result.error`: the stable code plus a
    /// human-readable tail.
    pub fn wire_message(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
