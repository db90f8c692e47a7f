//! ドメイン層のエラー型

use thiserror::Error;

use super::value_object::ConnectionId;

/// Value Object の生成に失敗したときのエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("{kind} must be a positive integer (got {value})")]
    NonPositiveId { kind: &'static str, value: i64 },

    #[error("screen name must not be empty")]
    EmptyScreenName,

    #[error("message body must not be empty")]
    EmptyMessageBody,

    #[error("message body has {length} characters (max {max})")]
    MessageBodyTooLong { length: usize, max: usize },

    #[error("socket token must not be empty")]
    EmptyToken,
}

/// Persistence collaborator failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// The backing store rejected or failed the operation.
    #[error("storage error: {0}")]
    Storage(String),

    /// A row that must exist (e.g. a message just inserted) could not be read back.
    #[error("{0} not found")]
    NotFound(String),

    /// A multi-row write was rolled back.
    #[error("transaction rolled back: {0}")]
    Transaction(String),
}

/// Outbound delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagePushError {
    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    #[error("failed to push message: {0}")]
    PushFailed(String),
}
