//! Infrastructure 層
//!
//! ドメイン層が定義するインターフェースの具体的な実装と、
//! WebSocket プロトコル（ハンドシェイク・フレーム）の実装を提供します。

pub mod dto;
pub mod repository;
pub mod secret;
pub mod websocket;
