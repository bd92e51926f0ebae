use thiserror::Error;
use vigil_core::ErrorCode;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Alert not found: {id}")]
    NotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AlertError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AlertError::Database(_) | AlertError::Serialization(_) => ErrorCode::Internal,
            AlertError::NotFound { .. } => ErrorCode::NotFound,
        }
    }
}

pub type Result<T> = std::result::Result<T, AlertError>;
