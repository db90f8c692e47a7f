//! Data Transfer Objects (DTOs) for the chat server.
//!
//! - `websocket`: JSON commands and events carried in WebSocket text frames
//! - `conversion`: domain entity → DTO conversion

pub mod conversion;
pub mod websocket;
