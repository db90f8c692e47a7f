//! HTTP/1.1 Upgrade handshake (RFC 6455 §4.2).
//!
//! Parsing is pure: the reactor feeds the buffered bytes, this module answers
//! with either the parsed request or the HTTP error to send before closing.
//! Token authentication itself happens in the `authenticate_socket` use case.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::domain::SocketToken;

/// The WebSocket GUID appended to the client key (RFC 6455 §4.2.2).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound for the request head before the terminator shows up.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("malformed request line")]
    MalformedRequest,

    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("missing token query parameter")]
    MissingToken,

    #[error("token rejected")]
    InvalidToken,

    #[error("request head exceeds the 8 KiB limit")]
    HeaderTooLarge,

    #[error("authentication backend unavailable")]
    Unavailable,
}

impl HandshakeError {
    /// HTTP status sent back before closing the socket.
    pub fn status(&self) -> u16 {
        match self {
            Self::MalformedRequest | Self::MissingKey => 400,
            Self::MissingToken | Self::InvalidToken => 401,
            Self::HeaderTooLarge => 431,
            Self::Unavailable => 503,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedRequest => "Bad Request",
            Self::MissingKey => "Missing websocket key",
            Self::MissingToken => "Missing token",
            Self::InvalidToken => "Invalid token",
            Self::HeaderTooLarge => "Request Header Fields Too Large",
            Self::Unavailable => "Service Unavailable",
        }
    }
}

/// A parsed upgrade request.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub path: String,
    pub key: String,
    pub token: SocketToken,
}

/// Length of the request head including the blank line, once fully buffered.
pub fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|position| position + HEADER_TERMINATOR.len())
}

/// Parse a complete request head (everything up to and including `\r\n\r\n`).
pub fn parse_upgrade_request(head: &[u8]) -> Result<UpgradeRequest, HandshakeError> {
    let text = std::str::from_utf8(head).map_err(|_| HandshakeError::MalformedRequest)?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().ok_or(HandshakeError::MalformedRequest)?;
    let path = parse_request_line(request_line)?;

    // Header names are lower-cased; the last occurrence wins.
    let headers: HashMap<String, String> = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect();

    let key = headers
        .get("sec-websocket-key")
        .filter(|key| !key.is_empty())
        .cloned()
        .ok_or(HandshakeError::MissingKey)?;

    let token = query_param(&path, "token")
        .and_then(|raw| SocketToken::new(raw).ok())
        .ok_or(HandshakeError::MissingToken)?;

    Ok(UpgradeRequest { path, key, token })
}

/// Accept `GET <path> HTTP/1.1` and return the path.
fn parse_request_line(line: &str) -> Result<String, HandshakeError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(path), Some(version), None)
            if method.eq_ignore_ascii_case("GET") && version.eq_ignore_ascii_case("HTTP/1.1") =>
        {
            Ok(path.to_string())
        }
        _ => Err(HandshakeError::MalformedRequest),
    }
}

/// Percent-decoded value of a query parameter in a request path.
pub fn query_param(path: &str, name: &str) -> Option<String> {
    let (_, query) = path.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// `Sec-WebSocket-Accept` for a client key: base64(SHA-1(key + GUID)).
pub fn accept_key(client_key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(client_key.trim().as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(sha1.finalize())
}

/// The `101 Switching Protocols` response.
pub fn build_accept_response(client_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
    .into_bytes()
}

/// Plain-text HTTP error sent before dropping a rejected upgrade.
pub fn build_error_response(error: &HandshakeError) -> Vec<u8> {
    let body = format!("{} {}", error.status(), error.reason());
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        error.status(),
        error.reason(),
        body.len(),
        body
    )
    .into_bytes()
}
