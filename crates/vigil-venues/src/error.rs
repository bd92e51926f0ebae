use thiserror::Error;
use vigil_core::ErrorCode;

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Venue not found: {id}")]
    NotFound { id: String },

    #[error("Venue name already registered: {name}")]
    DuplicateName { name: String },

    #[error("Token error: {0}")]
    Token(#[from] vigil_core::CoreError),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl VenueError {
    pub fn code(&self) -> ErrorCode {
        match self {
            VenueError::Database(_) => ErrorCode::Internal,
            VenueError::NotFound { .. } => ErrorCode::NotFound,
            VenueError::DuplicateName { .. } => ErrorCode::Conflict,
            VenueError::Token(e) => e.code(),
            VenueError::InvalidSchedule(_) => ErrorCode::InvalidParams,
        }
    }
}

pub type Result<T> = std::result::Result<T, VenueError>;
