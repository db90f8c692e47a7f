//! Server execution logic.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::domain::ChatStore;
use crate::infrastructure::websocket::DEFAULT_MAX_FRAME_SIZE;

use super::connection::DEFAULT_MAX_PENDING_WRITE;
use super::reactor::{Reactor, ShutdownHandle};

/// Fatal server errors. Everything that goes wrong on a single connection is
/// handled inside the loop instead.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address '{0}'")]
    Address(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("event loop failure: {0}")]
    Poll(#[source] io::Error),
}

/// Listener and loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound of a single readiness wait (the heartbeat tick).
    pub tick: Duration,
    /// Close connections that sent nothing for this long; `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: usize,
    /// Bytes queued for a slow reader before it is disconnected.
    pub max_pending_write: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tick: Duration::from_secs(1),
            idle_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_pending_write: DEFAULT_MAX_PENDING_WRITE,
        }
    }
}

impl ServerConfig {
    fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        let display = format!("{}:{}", self.host, self.port);
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| ServerError::Address(display.clone()))?
            .next()
            .ok_or(ServerError::Address(display))
    }
}

/// WebSocket chat server
///
/// Binding happens up front so callers (and tests binding port 0) can read the
/// actual address before the loop starts.
///
/// # Example
///
/// ```ignore
/// let server = Server::bind(ServerConfig::default(), store)?;
/// let handle = server.shutdown_handle();
/// server.run()?;
/// ```
#[derive(Debug)]
pub struct Server {
    reactor: Reactor,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind the listener described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not resolve or cannot be bound.
    pub fn bind(config: ServerConfig, store: Arc<dyn ChatStore>) -> Result<Self, ServerError> {
        let addr = config.socket_addr()?;
        let reactor = Reactor::bind(addr, config, store)?;
        let local_addr = reactor.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            reactor,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.shutdown_handle()
    }

    /// Run the event loop on the current thread until shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if polling for readiness fails.
    pub fn run(mut self) -> Result<(), ServerError> {
        tracing::info!("WebSocket chat server listening on {}", self.local_addr);
        tracing::info!("Connect to: ws://{}/ws?token=<socket token>", self.local_addr);

        self.reactor.run()?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repository::InMemoryChatStore;

    #[test]
    fn test_bind_port_zero_reports_actual_port() {
        // テスト項目: ポート 0 でバインドすると実際のポートが取得できる
        // given (前提条件):
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };

        // when (操作):
        let server = Server::bind(config, Arc::new(InMemoryChatStore::new())).unwrap();

        // then (期待する結果):
        assert!(server.local_addr().ip().is_loopback());
        assert_ne!(server.local_addr().port(), 0);
    }

    #[test]
    fn test_bind_rejects_unresolvable_host() {
        // テスト項目: 解決できないホストは Address エラーになる
        // given (前提条件):
        let config = ServerConfig {
            host: "not a host".to_string(),
            ..ServerConfig::default()
        };

        // when (操作):
        let result = Server::bind(config, Arc::new(InMemoryChatStore::new()));

        // then (期待する結果):
        assert!(matches!(result, Err(ServerError::Address(_))));
    }

    #[test]
    fn test_shutdown_stops_run() {
        // テスト項目: ShutdownHandle で停止を要求すると run が戻る
        // given (前提条件):
        let config = ServerConfig {
            port: 0,
            tick: Duration::from_millis(50),
            ..ServerConfig::default()
        };
        let server = Server::bind(config, Arc::new(InMemoryChatStore::new())).unwrap();
        let handle = server.shutdown_handle();
        let runner = std::thread::spawn(move || server.run());

        // when (操作):
        handle.shutdown();

        // then (期待する結果):
        assert!(runner.join().unwrap().is_ok());
    }
}
