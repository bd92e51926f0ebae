use thiserror::Error;
use vigil_core::ErrorCode;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("No roster member matching '{name}'")]
    NoSuchMember { name: String },

    #[error("Member '{name}' has no chat to notify")]
    MemberUnreachable { name: String },

    #[error("Guest token not found or expired")]
    GuestTokenInvalid,

    #[error("Guest token already claimed")]
    GuestTokenClaimed,
}

impl RosterError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RosterError::Database(_) => ErrorCode::Internal,
            RosterError::NoSuchMember { .. } | RosterError::GuestTokenInvalid => {
                ErrorCode::NotFound
            }
            RosterError::MemberUnreachable { .. } => ErrorCode::InvalidParams,
            RosterError::GuestTokenClaimed => ErrorCode::Conflict,
        }
    }
}

pub type Result<T> = std::result::Result<T, RosterError>;
