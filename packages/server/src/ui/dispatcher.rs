//! コマンドディスパッチャ
//!
//! 認証済み接続から届いたテキストフレームを解析し、対応するユースケースを実行して、
//! 結果を JSON イベント（ack / error / chat_message / dm / presence）として送信します。
//! 1 フレームの処理はすべての索引更新と送信が終わるまで完結します。

use std::sync::Arc;

use serde::Serialize;

use crate::{
    domain::{ChatStore, ConnectionId, Identity, MessagePusher, PresenceIndex, RoomId},
    infrastructure::dto::websocket::{
        AckEvent, ClientCommand, DmCommand, ErrorEvent, JoinCommand, LeaveCommand,
        MessageCommand, MessageEvent, MessagePayload, PresenceEvent, ReadyEvent, parse_command,
    },
    usecase::{
        Delivery, DisconnectParticipantUseCase, JoinRoomUseCase, LeaveRoomUseCase, RoomNotice,
        SendDirectMessageError, SendDirectMessageUseCase, SendMessageUseCase,
    },
};

/// Action reported for payloads whose `type` could not be read.
const UNKNOWN_ACTION: &str = "unknown";

type Reply = Result<AckEvent, ErrorEvent>;

/// Routes client commands to use cases and pushes the resulting events.
pub struct CommandDispatcher {
    join_room: JoinRoomUseCase,
    leave_room: LeaveRoomUseCase,
    send_message: SendMessageUseCase,
    send_direct_message: SendDirectMessageUseCase,
    disconnect_participant: DisconnectParticipantUseCase,
}

impl CommandDispatcher {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            join_room: JoinRoomUseCase::new(store.clone()),
            leave_room: LeaveRoomUseCase::new(store.clone()),
            send_message: SendMessageUseCase::new(store.clone()),
            send_direct_message: SendDirectMessageUseCase::new(store.clone()),
            disconnect_participant: DisconnectParticipantUseCase::new(store),
        }
    }

    /// Greet a freshly upgraded connection with its identity.
    pub fn send_ready(
        &self,
        pusher: &mut dyn MessagePusher,
        connection_id: ConnectionId,
        identity: &Identity,
    ) {
        send_event(pusher, connection_id, &ReadyEvent::from(identity));
    }

    /// Handle one text frame from `connection_id`.
    pub fn dispatch(
        &self,
        presence: &mut PresenceIndex,
        pusher: &mut dyn MessagePusher,
        connection_id: ConnectionId,
        text: &str,
    ) {
        let envelope = match parse_command(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("Unparseable payload from connection {}: {}", connection_id, e);
                let error = ErrorEvent::new(UNKNOWN_ACTION, e.to_string(), None);
                send_event(pusher, connection_id, &error);
                return;
            }
        };

        let request_id = envelope.request_id;
        tracing::debug!(
            "Connection {} sent '{}' (requestId {:?})",
            connection_id,
            envelope.command.action(),
            request_id
        );

        let reply = match envelope.command {
            ClientCommand::Join(command) => {
                self.handle_join(presence, pusher, connection_id, command, request_id)
            }
            ClientCommand::Leave(command) => {
                self.handle_leave(presence, pusher, connection_id, command, request_id)
            }
            ClientCommand::Message(command) => {
                self.handle_message(presence, pusher, connection_id, command, request_id)
            }
            ClientCommand::Dm(command) => {
                self.handle_dm(presence, pusher, connection_id, command, request_id)
            }
            ClientCommand::Ping => Ok(AckEvent::new("ping", request_id)),
            ClientCommand::Unsupported(kind) => {
                Err(ErrorEvent::new(kind, "Unsupported command", request_id))
            }
        };

        match reply {
            Ok(ack) => send_event(pusher, connection_id, &ack),
            Err(error) => send_event(pusher, connection_id, &error),
        }
    }

    /// Clean up after a closed connection and tell its room.
    pub fn disconnect(
        &self,
        presence: &mut PresenceIndex,
        pusher: &mut dyn MessagePusher,
        connection_id: ConnectionId,
    ) {
        if let Some(departure) = self.disconnect_participant.execute(presence, connection_id) {
            announce(pusher, departure);
        }
    }

    fn handle_join(
        &self,
        presence: &mut PresenceIndex,
        pusher: &mut dyn MessagePusher,
        connection_id: ConnectionId,
        command: JoinCommand,
        request_id: Option<i64>,
    ) -> Reply {
        let outcome = self
            .join_room
            .execute(
                presence,
                connection_id,
                to_room_id(command.room_id),
                command.passphrase.as_deref(),
            )
            .map_err(|e| ErrorEvent::new("join", e.to_string(), request_id))?;

        if let Some(departure) = outcome.departure {
            announce(pusher, departure);
        }
        if let Some(arrival) = outcome.arrival {
            announce(pusher, arrival);
        }

        let mut ack = AckEvent::new("join", request_id);
        ack.room_id = Some(outcome.room.id.value());
        ack.room_name = Some(outcome.room.name);
        ack.messages = Some(outcome.history.into_iter().map(MessagePayload::from).collect());
        ack.dms = Some(
            outcome
                .direct_history
                .into_iter()
                .map(MessagePayload::from)
                .collect(),
        );
        Ok(ack)
    }

    fn handle_leave(
        &self,
        presence: &mut PresenceIndex,
        pusher: &mut dyn MessagePusher,
        connection_id: ConnectionId,
        command: LeaveCommand,
        request_id: Option<i64>,
    ) -> Reply {
        let room_id = to_room_id(command.room_id);
        let departure = self
            .leave_room
            .execute(presence, connection_id, room_id)
            .map_err(|e| ErrorEvent::new("leave", e.to_string(), request_id))?;

        if let Some(departure) = departure {
            announce(pusher, departure);
        }

        let mut ack = AckEvent::new("leave", request_id);
        ack.room_id = room_id.map(|id| id.value());
        Ok(ack)
    }

    fn handle_message(
        &self,
        presence: &mut PresenceIndex,
        pusher: &mut dyn MessagePusher,
        connection_id: ConnectionId,
        command: MessageCommand,
        request_id: Option<i64>,
    ) -> Reply {
        let delivery = self
            .send_message
            .execute(
                presence,
                connection_id,
                to_room_id(command.room_id),
                command.body.as_deref().unwrap_or_default(),
            )
            .map_err(|e| ErrorEvent::new("message", e.to_string(), request_id))?;

        let mut ack = AckEvent::new("message", request_id);
        ack.room_id = Some(delivery.message.room_id.value());
        ack.message_id = Some(delivery.message.id.value());
        deliver(pusher, delivery);
        Ok(ack)
    }

    fn handle_dm(
        &self,
        presence: &mut PresenceIndex,
        pusher: &mut dyn MessagePusher,
        connection_id: ConnectionId,
        command: DmCommand,
        request_id: Option<i64>,
    ) -> Reply {
        let delivery = self
            .send_direct_message
            .execute(
                presence,
                connection_id,
                to_room_id(command.room_id),
                command.body.as_deref().unwrap_or_default(),
                &command.recipients,
            )
            .map_err(|e| {
                let mut error = ErrorEvent::new("dm", e.to_string(), request_id);
                if let SendDirectMessageError::UnknownRecipients { missing } = e {
                    error.missing = Some(missing);
                }
                error
            })?;

        let mut ack = AckEvent::new("dm", request_id);
        ack.room_id = Some(delivery.message.room_id.value());
        ack.dm_id = Some(delivery.message.id.value());
        deliver(pusher, delivery);
        Ok(ack)
    }
}

/// Non-positive or missing ids are left for the use case to reject.
fn to_room_id(raw: Option<i64>) -> Option<RoomId> {
    raw.and_then(|value| RoomId::new(value).ok())
}

fn deliver(pusher: &mut dyn MessagePusher, delivery: Delivery) {
    if delivery.targets.is_empty() {
        return;
    }
    let event = MessageEvent::from(delivery.message);
    match serde_json::to_string(&event) {
        Ok(json) => pusher.broadcast(&delivery.targets, &json),
        Err(e) => tracing::error!("Failed to serialize message event: {}", e),
    }
}

/// Presence event first, then the "joined/left the chat" message.
fn announce(pusher: &mut dyn MessagePusher, notice: RoomNotice) {
    if notice.targets.is_empty() {
        return;
    }
    match serde_json::to_string(&PresenceEvent::from(notice.change)) {
        Ok(json) => pusher.broadcast(&notice.targets, &json),
        Err(e) => tracing::error!("Failed to serialize presence event: {}", e),
    }
    if let Some(message) = notice.message {
        deliver(
            pusher,
            Delivery {
                message,
                targets: notice.targets,
            },
        );
    }
}

fn send_event<T: Serialize>(pusher: &mut dyn MessagePusher, target: ConnectionId, event: &T) {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize event for connection {}: {}", target, e);
            return;
        }
    };
    if let Err(e) = pusher.push_to(target, &json) {
        tracing::warn!("Failed to send event to connection {}: {}", target, e);
    }
}
