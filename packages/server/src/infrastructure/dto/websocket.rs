//! WebSocket message DTOs.
//!
//! Client → server commands are parsed in two steps: the envelope (`type`,
//! `requestId`) first, then the per-command fields. Field deserializers are
//! lenient on purpose so that a wrongly-typed field reaches the command
//! handler and yields the specific validation error (e.g. `Invalid room id`)
//! rather than a generic parse failure.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

// ========================================
// Client → Server
// ========================================

/// A parsed command together with its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub request_id: Option<i64>,
    pub command: ClientCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Join(JoinCommand),
    Leave(LeaveCommand),
    Message(MessageCommand),
    Dm(DmCommand),
    Ping,
    /// A well-formed envelope with a `type` the server does not handle.
    Unsupported(String),
}

impl ClientCommand {
    /// Action name echoed in ack and error events.
    pub fn action(&self) -> &str {
        match self {
            Self::Join(_) => "join",
            Self::Leave(_) => "leave",
            Self::Message(_) => "message",
            Self::Dm(_) => "dm",
            Self::Ping => "ping",
            Self::Unsupported(kind) => kind,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCommand {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub room_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveCommand {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub room_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCommand {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub room_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmCommand {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub room_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub recipients: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "requestId", default, deserialize_with = "lenient_i64")]
    request_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    /// Not JSON, not an object, or no string `type`.
    #[error("Invalid payload")]
    InvalidPayload,
}

/// Parse one text frame into a command envelope.
pub fn parse_command(text: &str) -> Result<CommandEnvelope, CommandParseError> {
    let value: Value = serde_json::from_str(text).map_err(|_| CommandParseError::InvalidPayload)?;
    if !value.is_object() {
        return Err(CommandParseError::InvalidPayload);
    }
    let envelope = RawEnvelope::deserialize(&value).map_err(|_| CommandParseError::InvalidPayload)?;

    // Every field deserializer is lenient, so only a non-object could fail here.
    let invalid = |_| CommandParseError::InvalidPayload;
    let command = match envelope.kind.as_str() {
        "join" => ClientCommand::Join(JoinCommand::deserialize(&value).map_err(invalid)?),
        "leave" => ClientCommand::Leave(LeaveCommand::deserialize(&value).map_err(invalid)?),
        "message" => ClientCommand::Message(MessageCommand::deserialize(&value).map_err(invalid)?),
        "dm" => ClientCommand::Dm(DmCommand::deserialize(&value).map_err(invalid)?),
        "ping" => ClientCommand::Ping,
        other => ClientCommand::Unsupported(other.to_string()),
    };

    Ok(CommandEnvelope {
        request_id: envelope.request_id,
        command,
    })
}

/// Integers, integral floats and numeric strings; anything else is `None`.
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_to_string))
}

/// A JSON array of names; non-array values yield an empty list.
fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items.into_iter().filter_map(value_to_string).collect(),
        _ => Vec::new(),
    })
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

// ========================================
// Server → Client
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Ready,
    Ack,
    Error,
    ChatMessage,
    Dm,
    Presence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceActionDto {
    Join,
    Leave,
}

/// A persisted message as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: i64,
    pub room_id: i64,
    pub body: String,
    pub created_at: String,
    pub sender: String,
    #[serde(rename = "isDM")]
    pub is_dm: bool,
}

/// Sent once right after a successful upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyEvent {
    pub r#type: EventType,
    pub user_id: i64,
    pub screen_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckEvent {
    pub r#type: EventType,
    pub action: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dm_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessagePayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dms: Option<Vec<MessagePayload>>,
}

impl AckEvent {
    /// An ack with no command-specific fields.
    pub fn new(action: impl Into<String>, request_id: Option<i64>) -> Self {
        Self {
            r#type: EventType::Ack,
            action: action.into(),
            status: "ok".to_string(),
            request_id,
            room_id: None,
            room_name: None,
            message_id: None,
            dm_id: None,
            messages: None,
            dms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub r#type: EventType,
    pub action: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
    /// Screen names that could not be resolved (unknown DM recipients).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<String>>,
}

impl ErrorEvent {
    pub fn new(action: impl Into<String>, message: impl Into<String>, request_id: Option<i64>) -> Self {
        Self {
            r#type: EventType::Error,
            action: action.into(),
            message: message.into(),
            request_id,
            missing: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub id: i64,
    pub screen_name: String,
}

/// A member entered or left the room; sent to the other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub r#type: EventType,
    pub room_id: i64,
    pub action: PresenceActionDto,
    pub user: PresenceUser,
}

/// Room broadcast (`chat_message`) or DM delivery (`dm`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub r#type: EventType,
    pub room_id: i64,
    pub message: MessagePayload,
}
