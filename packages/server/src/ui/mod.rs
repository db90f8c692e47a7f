//! WebSocket chat server implementation.
//!
//! A single `mio` reactor owns the connection registry and the presence index
//! and drives every use case.

pub mod connection;
pub mod dispatcher;
mod reactor;
mod server;

pub use reactor::ShutdownHandle;
pub use server::{Server, ServerConfig, ServerError};
