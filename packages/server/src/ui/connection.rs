//! 接続レジストリ
//!
//! リアクターが所有する TCP 接続の一覧です。各接続はソケット、受信バッファ、
//! 書き込み待ちバッファを持ち、`slab` のキーがそのまま [`ConnectionId`] になります。
//!
//! 書き込みはベストエフォートです。ソケットが `WouldBlock` を返した分は
//! 書き込み待ちバッファに積み、`WRITABLE` イベントで再送します。
//! 待ちバッファが上限を超えた接続はクローズ予定に入ります。

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::Registry;
use mio::net::TcpStream;
use slab::Slab;

use crate::domain::{ConnectionId, MessagePushError, MessagePusher};
use crate::infrastructure::websocket::FrameBuffer;
use crate::infrastructure::websocket::frame::encode_text;

/// Default upper bound for bytes queued behind a slow reader.
pub const DEFAULT_MAX_PENDING_WRITE: usize = 4 * 1024 * 1024;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the HTTP upgrade request.
    Handshaking,
    /// Upgraded; frames flow in both directions.
    Open,
    /// Scheduled for close; nothing more is read or pushed.
    Closing,
}

/// Result of draining a readable socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The socket would block; the peer is still there.
    Drained,
    /// The inbound buffer hit its limit; more bytes may wait in the socket.
    Full,
    /// The peer closed its write half.
    Eof,
}

/// Transport-side state of one client.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    phase: Phase,
    inbound: FrameBuffer,
    pending_write: Vec<u8>,
    last_activity: Instant,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            phase: Phase::Handshaking,
            inbound: FrameBuffer::new(),
            pending_write: Vec::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    pub fn mark_open(&mut self) {
        if self.phase == Phase::Handshaking {
            self.phase = Phase::Open;
        }
    }

    /// Bytes received but not yet consumed by the handshake or frame decoder.
    pub fn inbound(&mut self) -> &mut FrameBuffer {
        &mut self.inbound
    }

    pub fn pending_write_len(&self) -> usize {
        self.pending_write.len()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Read until the socket would block or `max_buffered` bytes are waiting
    /// in the inbound buffer.
    pub fn read_available(
        &mut self,
        scratch: &mut [u8],
        max_buffered: usize,
    ) -> io::Result<ReadStatus> {
        loop {
            let room = max_buffered.saturating_sub(self.inbound.len());
            if room == 0 {
                return Ok(ReadStatus::Full);
            }
            let chunk = scratch.len().min(room);
            match self.stream.read(&mut scratch[..chunk]) {
                Ok(0) => return Ok(ReadStatus::Eof),
                Ok(n) => {
                    self.inbound.extend(&scratch[..n]);
                    self.last_activity = Instant::now();
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadStatus::Drained);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Write `bytes` after anything already queued; the unwritten tail is queued.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.pending_write.is_empty() {
            let written = write_until_blocked(&mut self.stream, bytes)?;
            self.pending_write.extend_from_slice(&bytes[written..]);
        } else {
            self.pending_write.extend_from_slice(bytes);
            self.flush()?;
        }
        Ok(())
    }

    /// Retry queued bytes; called on `WRITABLE` readiness.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.pending_write.is_empty() {
            return Ok(());
        }
        let written = write_until_blocked(&mut self.stream, &self.pending_write)?;
        self.pending_write.drain(..written);
        Ok(())
    }
}

fn write_until_blocked(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < bytes.len() {
        match stream.write(&bytes[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

/// All live connections, keyed by [`ConnectionId`].
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    closing: Vec<ConnectionId>,
    max_pending_write: usize,
}

impl ConnectionRegistry {
    pub fn new(max_pending_write: usize) -> Self {
        Self {
            connections: Slab::with_capacity(1024),
            closing: Vec::new(),
            max_pending_write,
        }
    }

    /// Id the next inserted connection will get.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.connections.vacant_key())
    }

    pub fn insert(&mut self, connection: Connection) -> ConnectionId {
        ConnectionId::new(self.connections.insert(connection))
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id.value())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains(id.value())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .map(|(key, _)| ConnectionId::new(key))
            .collect()
    }

    /// Connections with no inbound traffic for longer than `timeout`.
    pub fn idle_ids(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, connection)| connection.phase != Phase::Closing)
            .filter(|(_, connection)| connection.idle_for(now) > timeout)
            .map(|(key, _)| ConnectionId::new(key))
            .collect()
    }

    /// Mark `id` for cleanup at the end of the current loop iteration.
    pub fn schedule_close(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.get_mut(id.value())
            && connection.phase != Phase::Closing
        {
            connection.phase = Phase::Closing;
            self.closing.push(id);
        }
    }

    pub fn has_scheduled_closes(&self) -> bool {
        !self.closing.is_empty()
    }

    pub fn take_scheduled_closes(&mut self) -> Vec<ConnectionId> {
        std::mem::take(&mut self.closing)
    }

    /// Send raw bytes regardless of phase (handshake responses, close frames).
    ///
    /// A write error or an overfull pending buffer schedules the connection for close.
    pub fn send_raw(&mut self, id: ConnectionId, bytes: &[u8]) -> io::Result<()> {
        let Some(connection) = self.connections.get_mut(id.value()) else {
            return Err(io::ErrorKind::NotFound.into());
        };
        let result = connection.send(bytes).and_then(|()| {
            if connection.pending_write_len() > self.max_pending_write {
                Err(io::Error::other(format!(
                    "{} bytes pending for a slow reader",
                    connection.pending_write_len()
                )))
            } else {
                Ok(())
            }
        });
        if let Err(ref e) = result {
            tracing::warn!("Closing connection {} ({}): {}", id, connection.peer, e);
            self.schedule_close(id);
        }
        result
    }

    /// Retry queued bytes for `id`; a write error schedules the connection for close.
    pub fn flush(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(id.value()) else {
            return;
        };
        if let Err(e) = connection.flush() {
            tracing::debug!("Write to connection {} failed: {}", id, e);
            self.schedule_close(id);
        }
    }

    /// Deregister and drop the connection, closing its socket.
    pub fn remove(&mut self, registry: &Registry, id: ConnectionId) -> Option<Connection> {
        let mut connection = self.connections.try_remove(id.value())?;
        // Last chance for a close frame or HTTP error that is still queued.
        let _ = connection.flush();
        if let Err(e) = registry.deregister(&mut connection.stream) {
            tracing::debug!("Failed to deregister connection {}: {}", id, e);
        }
        Some(connection)
    }
}

impl MessagePusher for ConnectionRegistry {
    fn push_to(&mut self, target: ConnectionId, content: &str) -> Result<(), MessagePushError> {
        match self.connections.get(target.value()).map(Connection::phase) {
            Some(Phase::Open) => {}
            Some(_) => {
                return Err(MessagePushError::PushFailed(format!(
                    "connection {} is not open",
                    target
                )));
            }
            None => return Err(MessagePushError::ConnectionNotFound(target)),
        }
        self.send_raw(target, &encode_text(content))
            .map_err(|e| MessagePushError::PushFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::websocket::Opcode;
    use crate::infrastructure::websocket::frame::try_decode_one;

    /// A connected pair: the server side wrapped for mio, the client side blocking.
    fn socket_pair() -> (TcpStream, SocketAddr, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), peer, client)
    }

    fn open_connection(registry: &mut ConnectionRegistry) -> (ConnectionId, std::net::TcpStream) {
        let (stream, peer, client) = socket_pair();
        let id = registry.insert(Connection::new(stream, peer));
        registry.get_mut(id).unwrap().mark_open();
        (id, client)
    }

    fn read_frame(client: &mut std::net::TcpStream) -> (Opcode, Vec<u8>) {
        let mut received = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            if let Some((frame, _)) = try_decode_one(&received, usize::MAX).unwrap() {
                return (frame.opcode, frame.payload);
            }
            let n = client.read(&mut chunk).unwrap();
            assert!(n > 0, "peer closed before a full frame arrived");
            received.extend_from_slice(&chunk[..n]);
        }
    }

    #[test]
    fn test_push_to_open_connection_writes_text_frame() {
        // テスト項目: 開いている接続への送信はテキストフレームとして書き込まれる
        // given (前提条件):
        let mut registry = ConnectionRegistry::new(DEFAULT_MAX_PENDING_WRITE);
        let (id, mut client) = open_connection(&mut registry);

        // when (操作):
        let result = registry.push_to(id, r#"{"type":"ack"}"#);

        // then (期待する結果):
        assert!(result.is_ok());
        let (opcode, payload) = read_frame(&mut client);
        assert_eq!(opcode, Opcode::Text);
        assert_eq!(payload, br#"{"type":"ack"}"#);
    }

    #[test]
    fn test_push_to_handshaking_or_missing_connection_fails() {
        // テスト項目: ハンドシェイク前の接続や存在しない接続には送信しない
        // given (前提条件):
        let mut registry = ConnectionRegistry::new(DEFAULT_MAX_PENDING_WRITE);
        let (stream, peer, _client) = socket_pair();
        let handshaking = registry.insert(Connection::new(stream, peer));

        // when (操作):
        let not_open = registry.push_to(handshaking, "{}");
        let missing = registry.push_to(ConnectionId::new(42), "{}");

        // then (期待する結果):
        assert!(matches!(not_open, Err(MessagePushError::PushFailed(_))));
        assert_eq!(
            missing,
            Err(MessagePushError::ConnectionNotFound(ConnectionId::new(42)))
        );
    }

    #[test]
    fn test_schedule_close_is_recorded_once() {
        // テスト項目: クローズ予定は 1 接続につき 1 回だけ記録され、以後は送信できない
        // given (前提条件):
        let mut registry = ConnectionRegistry::new(DEFAULT_MAX_PENDING_WRITE);
        let (id, _client) = open_connection(&mut registry);

        // when (操作):
        registry.schedule_close(id);
        registry.schedule_close(id);

        // then (期待する結果):
        assert_eq!(registry.take_scheduled_closes(), vec![id]);
        assert!(!registry.has_scheduled_closes());
        assert!(registry.push_to(id, "{}").is_err());
    }

    #[test]
    fn test_slow_reader_is_scheduled_for_close() {
        // テスト項目: 書き込み待ちが上限を超えた接続はクローズ予定になる
        // given (前提条件): 相手が読まないまま大量に送信する
        let mut registry = ConnectionRegistry::new(64 * 1024);
        let (id, _client) = open_connection(&mut registry);
        let chunk = "x".repeat(64 * 1024);

        // when (操作):
        let mut failed = false;
        for _ in 0..1024 {
            if registry.push_to(id, &chunk).is_err() {
                failed = true;
                break;
            }
        }

        // then (期待する結果):
        assert!(failed);
        assert_eq!(registry.take_scheduled_closes(), vec![id]);
    }

    #[test]
    fn test_read_available_buffers_bytes_and_detects_eof() {
        // テスト項目: 受信データは受信バッファに蓄積され、相手の切断は Eof になる
        // given (前提条件):
        let mut registry = ConnectionRegistry::new(DEFAULT_MAX_PENDING_WRITE);
        let (id, mut client) = open_connection(&mut registry);
        client.write_all(b"GET / HTTP/1.1\r\n").unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();
        let mut scratch = [0u8; 8];

        // when (操作): ノンブロッキングなので Eof まで読み直す
        let connection = registry.get_mut(id).unwrap();
        let mut status = connection.read_available(&mut scratch, 1024);
        for _ in 0..100 {
            if matches!(status, Ok(ReadStatus::Eof)) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
            status = connection.read_available(&mut scratch, 1024);
        }

        // then (期待する結果):
        assert_eq!(status.unwrap(), ReadStatus::Eof);
        assert_eq!(connection.inbound().remaining(), b"GET / HTTP/1.1\r\n");
    }

    #[test]
    fn test_read_available_stops_at_buffer_limit() {
        // テスト項目: 受信バッファが上限に達すると読み込みを止め、残りはソケットに残る
        // given (前提条件):
        let mut registry = ConnectionRegistry::new(DEFAULT_MAX_PENDING_WRITE);
        let (id, mut client) = open_connection(&mut registry);
        client.write_all(&[b'a'; 4096]).unwrap();
        let mut scratch = [0u8; 1000];
        let connection = registry.get_mut(id).unwrap();

        // when (操作): 上限 2500 バイトで読めるだけ読む
        let mut status = connection.read_available(&mut scratch, 2500);
        for _ in 0..100 {
            if matches!(status, Ok(ReadStatus::Full)) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
            status = connection.read_available(&mut scratch, 2500);
        }
        let buffered = connection.inbound().len();
        connection.inbound().consume(buffered);
        let mut rest = connection.read_available(&mut scratch, 2500);
        for _ in 0..100 {
            if connection.inbound().len() == 4096 - buffered {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
            rest = connection.read_available(&mut scratch, 2500);
        }

        // then (期待する結果):
        assert_eq!(status.unwrap(), ReadStatus::Full);
        assert_eq!(buffered, 2500);
        assert_eq!(rest.unwrap(), ReadStatus::Drained);
        assert_eq!(connection.inbound().len(), 4096 - 2500);
    }

    #[test]
    fn test_idle_ids_skips_recent_and_closing_connections() {
        // テスト項目: アイドル判定は最終受信時刻で行い、クローズ予定の接続は含めない
        // given (前提条件):
        let mut registry = ConnectionRegistry::new(DEFAULT_MAX_PENDING_WRITE);
        let (active, _a) = open_connection(&mut registry);
        let (closing, _b) = open_connection(&mut registry);
        registry.schedule_close(closing);
        let later = Instant::now() + Duration::from_secs(60);

        // when (操作):
        let idle_now = registry.idle_ids(Instant::now(), Duration::from_secs(30));
        let idle_later = registry.idle_ids(later, Duration::from_secs(30));

        // then (期待する結果):
        assert!(idle_now.is_empty());
        assert_eq!(idle_later, vec![active]);
    }
}
