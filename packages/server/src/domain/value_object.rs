//! Value Object 定義
//!
//! 生の整数・文字列をドメインの型で包み、生成時に不変条件を検証します。
//! 検証済みの値だけがユースケース層へ渡るため、ユースケース側では再検証しません。

use std::fmt;

use serde::Serialize;

use super::error::ValueObjectError;

/// Maximum number of characters in a chat or direct message body.
pub const MAX_MESSAGE_BODY_CHARS: usize = 4096;

/// Identifier of a live connection inside the reactor (the slab key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(usize);

impl ConnectionId {
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    pub fn value(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Declares a positive integer identifier issued by persistence.
macro_rules! positive_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Create a new identifier, rejecting zero and negative values.
            pub fn new(value: i64) -> Result<Self, ValueObjectError> {
                if value <= 0 {
                    return Err(ValueObjectError::NonPositiveId {
                        kind: $label,
                        value,
                    });
                }
                Ok(Self(value))
            }

            pub fn value(&self) -> i64 {
                self.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = ValueObjectError;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

positive_id!(
    /// Identifier of a registered user.
    UserId,
    "user id"
);
positive_id!(
    /// Identifier of a chat room.
    RoomId,
    "room id"
);
positive_id!(
    /// Identifier of the persisted socket record that issued a bearer token.
    SocketRecordId,
    "socket record id"
);
positive_id!(
    /// Identifier of a persisted chat message or direct message.
    MessageId,
    "message id"
);

/// Public display name of a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ScreenName(String);

impl ScreenName {
    /// Create a screen name; surrounding whitespace is trimmed and the result must not be empty.
    pub fn new(value: impl AsRef<str>) -> Result<Self, ValueObjectError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValueObjectError::EmptyScreenName);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Wrap a name read back from persistence without re-validating it.
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for ScreenName {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for ScreenName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of a chat message or direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MessageBody(String);

impl MessageBody {
    /// Create a message body from user input.
    ///
    /// The input is trimmed; an empty result or a body longer than
    /// [`MAX_MESSAGE_BODY_CHARS`] characters is rejected.
    pub fn new(value: impl AsRef<str>) -> Result<Self, ValueObjectError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValueObjectError::EmptyMessageBody);
        }
        let length = trimmed.chars().count();
        if length > MAX_MESSAGE_BODY_CHARS {
            return Err(ValueObjectError::MessageBodyTooLong {
                length,
                max: MAX_MESSAGE_BODY_CHARS,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Build the body of a server-generated notice such as "alice joined the chat".
    pub fn system_notice(screen_name: &ScreenName, action: &str) -> Self {
        Self(format!("{} {} the chat", screen_name.as_str(), action))
    }

    /// Wrap a body read back from persistence.
    ///
    /// Stored rows are not re-validated: system notices and rows written by
    /// other writers may exceed the limits applied to user input.
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for MessageBody {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Opaque bearer credential presented during the WebSocket handshake.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SocketToken(String);

impl SocketToken {
    pub fn new(value: impl AsRef<str>) -> Result<Self, ValueObjectError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValueObjectError::EmptyToken);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for SocketToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SocketToken(***)")
    }
}

/// Unix timestamp in milliseconds (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// RFC 3339 rendering used on the wire (`createdAt`).
    pub fn to_rfc3339(&self) -> String {
        tsudoi_shared::time::timestamp_to_rfc3339(self.0)
    }
}
