//! Tsudoi chat server library.
//!
//! Room-based chat over a hand-rolled WebSocket implementation: the upgrade
//! handshake, the frame codec and the event loop are written on top of `mio`
//! rather than an HTTP framework.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;
