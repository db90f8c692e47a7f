//! リアクター（イベントループ）
//!
//! 単一スレッドで `mio::Poll` を回し、すべての接続の I/O とコマンド処理を行います。
//! 1 回のループで次の順に処理します。
//!
//! 1. 待ち受けソケットの新規接続を受け付ける
//! 2. 読み込み可能な接続を `WouldBlock` まで読み、ハンドシェイクまたはフレーム処理を行う
//!    （受信バッファが上限に達した接続は次のループで続きを読む）
//! 3. 書き込み可能になった接続の書き込み待ちを送る
//! 4. アイドル接続をクローズ予定に入れる
//! 5. クローズ予定の接続を後始末する（ルーム退出、切断記録、索引からの削除）
//!
//! すべての索引更新は 1 フレームの処理中に完結するため、ロックは不要です。

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::domain::{ChatStore, ConnectionId, PresenceIndex};
use crate::infrastructure::websocket::frame::{close_code, encode, encode_close};
use crate::infrastructure::websocket::handshake::{
    build_accept_response, build_error_response, find_header_end, parse_upgrade_request,
};
use crate::infrastructure::websocket::{
    Frame, FrameError, HandshakeError, MAX_FRAME_HEADER_BYTES, MAX_HEADER_BYTES, Opcode,
    UpgradeRequest,
};
use crate::usecase::{AuthenticateError, AuthenticateSocketUseCase};

use super::connection::{Connection, ConnectionRegistry, Phase, ReadStatus};
use super::dispatcher::CommandDispatcher;
use super::server::{ServerConfig, ServerError};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
/// Connection tokens start after the reserved ones.
const FIRST_CONNECTION_TOKEN: usize = 2;

const EVENTS_CAPACITY: usize = 1024;
const READ_CHUNK: usize = 32 * 1024;

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_PROTOCOL_ERROR: u16 = 1002;
const CLOSE_INVALID_PAYLOAD: u16 = 1007;
const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;

fn token_for(id: ConnectionId) -> Token {
    Token(id.value() + FIRST_CONNECTION_TOKEN)
}

fn connection_for(token: Token) -> Option<ConnectionId> {
    token
        .0
        .checked_sub(FIRST_CONNECTION_TOKEN)
        .map(ConnectionId::new)
}

/// Stops a running reactor from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            tracing::warn!("Failed to wake the event loop: {}", e);
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Single-threaded readiness loop owning every registry.
pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    shutdown: ShutdownHandle,
    connections: ConnectionRegistry,
    presence: PresenceIndex,
    authenticate: AuthenticateSocketUseCase,
    dispatcher: CommandDispatcher,
    config: ServerConfig,
    scratch: Vec<u8>,
    /// Connections that stopped reading at their buffer limit.
    unread: Vec<ConnectionId>,
}

impl Reactor {
    pub fn bind(
        addr: SocketAddr,
        config: ServerConfig,
        store: Arc<dyn ChatStore>,
    ) -> Result<Self, ServerError> {
        let poll = Poll::new().map_err(ServerError::Poll)?;
        let mut listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ServerError::Poll)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(ServerError::Poll)?;

        Ok(Self {
            poll,
            listener,
            shutdown: ShutdownHandle {
                requested: Arc::new(AtomicBool::new(false)),
                waker: Arc::new(waker),
            },
            connections: ConnectionRegistry::new(config.max_pending_write),
            presence: PresenceIndex::new(),
            authenticate: AuthenticateSocketUseCase::new(store.clone()),
            dispatcher: CommandDispatcher::new(store),
            config,
            scratch: vec![0; READ_CHUNK],
            unread: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested. Only poll failures are fatal.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.shutdown.is_requested() {
            // Readiness is edge-triggered: bytes left in a socket raise no new event.
            let timeout = if self.unread.is_empty() {
                self.config.tick
            } else {
                Duration::ZERO
            };
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ServerError::Poll(e));
            }

            let carried = std::mem::take(&mut self.unread);
            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_connections(),
                    WAKER => {}
                    token => self.handle_event(token, event),
                }
            }
            for id in carried {
                if self.connections.contains(id) {
                    self.read_ready(id);
                }
            }

            self.close_idle_connections();
            self.process_closes();
        }

        self.close_all();
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let id = self.connections.next_id();
                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        token_for(id),
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        tracing::warn!("Failed to register connection from {}: {}", peer, e);
                        continue;
                    }
                    self.connections.insert(Connection::new(stream, peer));
                    tracing::debug!("Accepted connection {} from {}", id, peer);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_event(&mut self, token: Token, event: &Event) {
        let Some(id) = connection_for(token) else {
            return;
        };
        if !self.connections.contains(id) {
            return;
        }
        if event.is_writable() {
            self.connections.flush(id);
        }
        if event.is_readable() {
            self.read_ready(id);
        }
    }

    fn read_ready(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(id) else {
            return;
        };
        let phase = connection.phase();
        // A full buffer always holds a complete request head or frame, or an error.
        let max_buffered = match phase {
            Phase::Handshaking => MAX_HEADER_BYTES + 1,
            Phase::Open => self.config.max_frame_size + MAX_FRAME_HEADER_BYTES,
            Phase::Closing => return,
        };

        let status = connection.read_available(&mut self.scratch, max_buffered);
        match status {
            Ok(ReadStatus::Drained | ReadStatus::Full) => {}
            Ok(ReadStatus::Eof) => tracing::debug!("Connection {} closed by peer", id),
            Err(ref e) => tracing::debug!("Read from connection {} failed: {}", id, e),
        }

        // Bytes that arrived with the EOF are still processed.
        if phase == Phase::Handshaking {
            self.try_handshake(id);
        }
        self.process_frames(id);

        match status {
            Ok(ReadStatus::Drained) => {}
            Ok(ReadStatus::Full) => {
                if self
                    .connections
                    .get_mut(id)
                    .is_some_and(|connection| connection.phase() != Phase::Closing)
                {
                    self.unread.push(id);
                }
            }
            Ok(ReadStatus::Eof) | Err(_) => self.connections.schedule_close(id),
        }
    }

    fn try_handshake(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(id) else {
            return;
        };
        let buffered = connection.inbound().remaining();
        let Some(end) = find_header_end(buffered) else {
            if buffered.len() > MAX_HEADER_BYTES {
                self.reject(id, HandshakeError::HeaderTooLarge);
            }
            return;
        };
        if end > MAX_HEADER_BYTES {
            self.reject(id, HandshakeError::HeaderTooLarge);
            return;
        }

        let request = parse_upgrade_request(&buffered[..end]);
        connection.inbound().consume(end);
        match request {
            Ok(request) => self.complete_handshake(id, request),
            Err(e) => self.reject(id, e),
        }
    }

    fn complete_handshake(&mut self, id: ConnectionId, request: UpgradeRequest) {
        let identity = match self
            .authenticate
            .execute(&mut self.presence, id, &request.token)
        {
            Ok(identity) => identity,
            Err(AuthenticateError::InvalidToken) => {
                self.reject(id, HandshakeError::InvalidToken);
                return;
            }
            Err(e @ AuthenticateError::Unavailable(_)) => {
                tracing::error!("Token lookup for connection {} failed: {:?}", id, e);
                self.reject(id, HandshakeError::Unavailable);
                return;
            }
        };

        if self
            .connections
            .send_raw(id, &build_accept_response(&request.key))
            .is_err()
        {
            return;
        }
        if let Some(connection) = self.connections.get_mut(id) {
            connection.mark_open();
            tracing::debug!("Connection {} upgraded on {}", id, request.path);
        }
        self.dispatcher
            .send_ready(&mut self.connections, id, &identity);
    }

    fn reject(&mut self, id: ConnectionId, error: HandshakeError) {
        if let Some(connection) = self.connections.get_mut(id) {
            tracing::warn!(
                "Rejected upgrade from {} ({}): {}",
                connection.peer(),
                error.status(),
                error
            );
        }
        // A failed write schedules the close as well.
        let _ = self.connections.send_raw(id, &build_error_response(&error));
        self.connections.schedule_close(id);
    }

    fn process_frames(&mut self, id: ConnectionId) {
        loop {
            let decoded = match self.connections.get_mut(id) {
                Some(connection) if connection.is_open() => connection
                    .inbound()
                    .try_decode_one(self.config.max_frame_size),
                _ => return,
            };
            match decoded {
                Ok(Some(frame)) => self.handle_frame(id, frame),
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!("Protocol error on connection {}: {}", id, e);
                    let code = match e {
                        FrameError::TooLarge { .. } => CLOSE_MESSAGE_TOO_BIG,
                        _ => CLOSE_PROTOCOL_ERROR,
                    };
                    self.close_with(id, code);
                    return;
                }
            }
        }
    }

    fn handle_frame(&mut self, id: ConnectionId, frame: Frame) {
        match frame.opcode {
            Opcode::Text if frame.fin => match String::from_utf8(frame.payload) {
                Ok(text) => {
                    self.dispatcher
                        .dispatch(&mut self.presence, &mut self.connections, id, &text)
                }
                Err(_) => {
                    tracing::warn!("Connection {} sent a non UTF-8 text frame", id);
                    self.close_with(id, CLOSE_INVALID_PAYLOAD);
                }
            },
            Opcode::Ping => {
                let _ = self
                    .connections
                    .send_raw(id, &encode(&frame.payload, Opcode::Pong));
            }
            Opcode::Close => {
                let code = close_code(&frame.payload).unwrap_or(CLOSE_NORMAL);
                tracing::debug!("Connection {} sent close ({})", id, code);
                self.close_with(id, code);
            }
            Opcode::Text | Opcode::Binary | Opcode::Continuation | Opcode::Pong => {
                tracing::debug!("Ignoring {:?} frame from connection {}", frame.opcode, id);
            }
        }
    }

    /// Queue a close frame and schedule cleanup.
    fn close_with(&mut self, id: ConnectionId, code: u16) {
        let _ = self.connections.send_raw(id, &encode_close(Some(code)));
        self.connections.schedule_close(id);
    }

    fn close_idle_connections(&mut self) {
        let Some(timeout) = self.config.idle_timeout else {
            return;
        };
        for id in self.connections.idle_ids(Instant::now(), timeout) {
            tracing::info!("Closing connection {} after {:?} of inactivity", id, timeout);
            self.close_with(id, CLOSE_GOING_AWAY);
        }
    }

    /// Run the cleanup path for every scheduled connection.
    ///
    /// Departure broadcasts can overflow another slow reader, so this repeats
    /// until nothing is left.
    fn process_closes(&mut self) {
        while self.connections.has_scheduled_closes() {
            for id in self.connections.take_scheduled_closes() {
                self.dispatcher
                    .disconnect(&mut self.presence, &mut self.connections, id);
                if let Some(connection) = self.connections.remove(self.poll.registry(), id) {
                    tracing::debug!("Connection {} from {} removed", id, connection.peer());
                }
            }
        }
    }

    fn close_all(&mut self) {
        let ids = self.connections.ids();
        tracing::info!("Shutting down, closing {} connections", ids.len());
        for id in ids {
            self.close_with(id, CLOSE_GOING_AWAY);
        }
        self.process_closes();
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("listener", &self.listener)
            .field("connections", &self.connections.len())
            .field("sessions", &self.presence.session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_map_to_connection_ids() {
        // テスト項目: 接続 ID とトークンの対応が予約トークンと重ならない
        // given (前提条件):
        let id = ConnectionId::new(0);

        // when (操作):
        let token = token_for(id);

        // then (期待する結果):
        assert_ne!(token, LISTENER);
        assert_ne!(token, WAKER);
        assert_eq!(connection_for(token), Some(id));
        assert_eq!(connection_for(LISTENER), None);
        assert_eq!(connection_for(WAKER), None);
    }
}
