//! UseCase 層のエラー型
//!
//! `Display` の文字列はそのままクライアントへ返すエラーメッセージになります。

use thiserror::Error;

use crate::domain::RepositoryError;

/// Handshake token authentication failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticateError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Service Unavailable")]
    Unavailable(#[source] RepositoryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinRoomError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid room id")]
    InvalidRoomId,

    #[error("Room not found")]
    RoomNotFound,

    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Unable to join room")]
    Persistence(#[source] RepositoryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaveRoomError {
    #[error("Invalid room id")]
    InvalidRoomId,

    #[error("Unable to leave room")]
    Persistence(#[source] RepositoryError),
}

impl From<LeaveRoomError> for JoinRoomError {
    fn from(error: LeaveRoomError) -> Self {
        match error {
            LeaveRoomError::InvalidRoomId => Self::InvalidRoomId,
            LeaveRoomError::Persistence(inner) => Self::Persistence(inner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendMessageError {
    #[error("Join a room first")]
    JoinRoomFirst,

    #[error("Invalid room context")]
    InvalidRoomContext,

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Message is too long")]
    MessageTooLong,

    #[error("Failed to persist message")]
    PersistFailed(#[source] RepositoryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendDirectMessageError {
    #[error("Join a room first")]
    JoinRoomFirst,

    #[error("Invalid room context")]
    InvalidRoomContext,

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Message is too long")]
    MessageTooLong,

    #[error("At least one recipient required")]
    NoRecipients,

    #[error("Recipients not provided")]
    RecipientsNotProvided,

    /// Some screen names did not resolve; nothing was written.
    #[error("Unknown recipients")]
    UnknownRecipients { missing: Vec<String> },

    #[error("Unable to send DM")]
    SendFailed(#[source] RepositoryError),
}
