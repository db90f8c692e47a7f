//! Conversion logic between domain entities and DTOs.

use crate::domain::entity;
use crate::infrastructure::dto::websocket as dto;

// ========================================
// Domain Entity → DTO
// ========================================

impl From<entity::ChatMessage> for dto::MessagePayload {
    fn from(model: entity::ChatMessage) -> Self {
        Self {
            id: model.id.value(),
            room_id: model.room_id.value(),
            created_at: model.created_at.to_rfc3339(),
            body: model.body.into_string(),
            sender: model.sender.into_string(),
            is_dm: model.is_dm,
        }
    }
}

impl From<entity::ChatMessage> for dto::MessageEvent {
    fn from(model: entity::ChatMessage) -> Self {
        let r#type = if model.is_dm {
            dto::EventType::Dm
        } else {
            dto::EventType::ChatMessage
        };
        Self {
            r#type,
            room_id: model.room_id.value(),
            message: model.into(),
        }
    }
}

impl From<entity::PresenceChange> for dto::PresenceEvent {
    fn from(change: entity::PresenceChange) -> Self {
        let action = match change.action {
            entity::PresenceAction::Join => dto::PresenceActionDto::Join,
            entity::PresenceAction::Leave => dto::PresenceActionDto::Leave,
        };
        Self {
            r#type: dto::EventType::Presence,
            room_id: change.room_id.value(),
            action,
            user: dto::PresenceUser {
                id: change.user_id.value(),
                screen_name: change.screen_name.into_string(),
            },
        }
    }
}

impl From<&entity::Identity> for dto::ReadyEvent {
    fn from(identity: &entity::Identity) -> Self {
        Self {
            r#type: dto::EventType::Ready,
            user_id: identity.user_id.value(),
            screen_name: identity.screen_name.as_str().to_string(),
        }
    }
}
