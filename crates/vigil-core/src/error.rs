use thiserror::Error;

/// Wire-level error taxonomy. Every error a caller can observe — over the
/// WS legs, the admin HTTP API, or a `command_result` — carries one of
/// these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidParams,
    DeviceNotConfigured,
    DeviceUnreachable,
    RateLimited,
    Timeout,
    NotFound,
    Unauthenticated,
    Conflict,
    ServiceUnavailable,
    Internal,
}

impl ErrorCode {
    /// Stable string form sent to clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParams => "invalid_params",
            ErrorCode::DeviceNotConfigured => "device_not_configured",
            ErrorCode::DeviceUnreachable => "device_unreachable",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::Timeout => "timeout",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::Conflict => "conflict",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Token error: {0}")]
    Token(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Config(_) => ErrorCode::Internal,
            CoreError::Token(_) => ErrorCode::Unauthenticated,
            CoreError::Serialization(_) => ErrorCode::Internal,
            CoreError::Io(_) => ErrorCode::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
