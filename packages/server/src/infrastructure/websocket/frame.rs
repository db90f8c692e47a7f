//! WebSocket frame codec (RFC 6455 §5).
//!
//! Server → client frames are always single, unmasked and FIN=1.
//! Client → server masking is removed on decode. Fragmented messages are not
//! supported: continuation and binary frames decode but are ignored upstream.

use thiserror::Error;

/// Default upper bound for a single frame payload (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Longest possible frame header: 2 bytes, 8-byte length, 4-byte mask.
pub const MAX_FRAME_HEADER_BYTES: usize = 14;

/// Frame opcode (low 4 bits of the first byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value & 0x0F {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unknown opcode 0x{0:X}")]
    UnknownOpcode(u8),

    #[error("reserved bits must be 0 (no extensions negotiated)")]
    ReservedBits,

    #[error("frame payload of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: usize },
}

/// A decoded frame with the mask already removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Encode a single unmasked frame with FIN set.
pub fn encode(payload: &[u8], opcode: Opcode) -> Vec<u8> {
    let length = payload.len();
    let mut frame = Vec::with_capacity(length + 10);
    frame.push(0x80 | opcode.to_u8());

    if length <= 125 {
        frame.push(length as u8);
    } else if length <= usize::from(u16::MAX) {
        frame.push(126);
        frame.extend_from_slice(&(length as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(length as u64).to_be_bytes());
    }

    frame.extend_from_slice(payload);
    frame
}

/// Encode a text frame.
pub fn encode_text(text: &str) -> Vec<u8> {
    encode(text.as_bytes(), Opcode::Text)
}

/// Encode a close frame, optionally carrying a status code.
pub fn encode_close(code: Option<u16>) -> Vec<u8> {
    match code {
        Some(code) => encode(&code.to_be_bytes(), Opcode::Close),
        None => encode(&[], Opcode::Close),
    }
}

/// Status code carried by a close frame payload, if any.
pub fn close_code(payload: &[u8]) -> Option<u16> {
    match payload {
        [high, low, ..] => Some(u16::from_be_bytes([*high, *low])),
        _ => None,
    }
}

/// Try to decode one frame from the front of `input`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the frame and the
/// number of bytes it occupied.
pub fn try_decode_one(
    input: &[u8],
    max_payload: usize,
) -> Result<Option<(Frame, usize)>, FrameError> {
    let [b1, b2, ..] = input else {
        return Ok(None);
    };

    if b1 & 0x70 != 0 {
        return Err(FrameError::ReservedBits);
    }
    let fin = b1 & 0x80 != 0;
    let opcode = Opcode::from_u8(*b1)?;
    let masked = b2 & 0x80 != 0;

    let mut offset = 2;
    let declared: u64 = match b2 & 0x7F {
        126 => {
            let Some(bytes) = input.get(offset..offset + 2) else {
                return Ok(None);
            };
            offset += 2;
            u64::from(u16::from_be_bytes([bytes[0], bytes[1]]))
        }
        127 => {
            let Some(bytes) = input.get(offset..offset + 8) else {
                return Ok(None);
            };
            offset += 8;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            u64::from_be_bytes(raw)
        }
        literal => u64::from(literal),
    };

    if declared > max_payload as u64 {
        return Err(FrameError::TooLarge {
            size: declared,
            limit: max_payload,
        });
    }
    let payload_len = declared as usize;

    let mask = if masked {
        let Some(bytes) = input.get(offset..offset + 4) else {
            return Ok(None);
        };
        offset += 4;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    } else {
        None
    };

    let end = offset.saturating_add(payload_len);
    let Some(body) = input.get(offset..end) else {
        return Ok(None);
    };

    let mut payload = body.to_vec();
    if let Some(mask) = mask {
        apply_mask(&mut payload, mask);
    }

    Ok(Some((
        Frame {
            fin,
            opcode,
            payload,
        },
        end,
    )))
}

/// XOR `payload` with the 4-byte masking key, cyclically.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Growable inbound buffer with a read cursor.
///
/// Partial frames stay buffered until the next read completes them.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    bytes: Vec<u8>,
    cursor: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.cursor..]
    }

    pub fn len(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark `count` bytes as consumed.
    pub fn consume(&mut self, count: usize) {
        self.cursor = (self.cursor + count).min(self.bytes.len());
        if self.cursor == self.bytes.len() {
            self.bytes.clear();
            self.cursor = 0;
        } else if self.cursor > self.bytes.capacity() / 2 {
            self.bytes.drain(..self.cursor);
            self.cursor = 0;
        }
    }

    /// Decode the next complete frame, consuming its bytes.
    pub fn try_decode_one(&mut self, max_payload: usize) -> Result<Option<Frame>, FrameError> {
        match try_decode_one(self.remaining(), max_payload)? {
            Some((frame, used)) => {
                self.consume(used);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(buffer: &mut FrameBuffer) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = buffer.try_decode_one(DEFAULT_MAX_FRAME_SIZE).unwrap() {
            frames.push(frame);
        }
        frames
    }

    /// Build a client frame (masked) the way a browser would.
    fn client_frame(payload: &[u8], opcode: Opcode, mask: [u8; 4]) -> Vec<u8> {
        let unmasked = encode(payload, opcode);
        let header_len = unmasked.len() - payload.len();
        let mut frame = unmasked[..header_len].to_vec();
        frame[1] |= 0x80;
        frame.extend_from_slice(&mask);
        let mut body = payload.to_vec();
        apply_mask(&mut body, mask);
        frame.extend_from_slice(&body);
        frame
    }

    #[test]
    fn test_encode_header_lengths() {
        // テスト項目: ペイロード長に応じて 1/3/9 バイトの長さ表現が使われる
        // given (前提条件):
        let small = vec![b'a'; 125];
        let medium = vec![b'a'; 126];
        let large = vec![b'a'; 65536];

        // when (操作):
        let small_frame = encode(&small, Opcode::Text);
        let medium_frame = encode(&medium, Opcode::Text);
        let large_frame = encode(&large, Opcode::Text);

        // then (期待する結果):
        assert_eq!(&small_frame[..2], &[0x81, 125]);
        assert_eq!(&medium_frame[..4], &[0x81, 126, 0x00, 126]);
        assert_eq!(&large_frame[..2], &[0x81, 127]);
        assert_eq!(&large_frame[2..10], &65536u64.to_be_bytes());
        assert_eq!(large_frame.len(), 10 + 65536);
    }

    #[test]
    fn test_round_trip_across_length_encodings() {
        // テスト項目: 長さ 0/125/126/65535/65536 でエンコード → デコードが元に戻る
        // given (前提条件):
        let lengths = [0usize, 125, 126, 65535, 65536];

        for length in lengths {
            let payload: Vec<u8> = (0..length).map(|i| (i % 251) as u8).collect();

            // when (操作):
            let encoded = encode(&payload, Opcode::Text);
            let decoded = try_decode_one(&encoded, usize::MAX).unwrap();

            // then (期待する結果):
            let (frame, used) = decoded.expect("frame should be complete");
            assert_eq!(used, encoded.len(), "length {}", length);
            assert_eq!(frame.payload, payload, "length {}", length);
            assert_eq!(frame.opcode, Opcode::Text);
            assert!(frame.fin);
        }
    }

    #[test]
    fn test_decode_removes_client_mask() {
        // テスト項目: クライアントのマスクが XOR で除去される
        // given (前提条件):
        let frame = client_frame(b"{\"type\":\"ping\"}", Opcode::Text, [0x37, 0xfa, 0x21, 0x3d]);

        // when (操作):
        let (decoded, used) = try_decode_one(&frame, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();

        // then (期待する結果):
        assert_eq!(decoded.payload, b"{\"type\":\"ping\"}");
        assert_eq!(used, frame.len());
    }

    #[test]
    fn test_decode_rfc_masked_hello_example() {
        // テスト項目: RFC 6455 §5.7 のマスク付き "Hello" の例をデコードできる
        // given (前提条件):
        let frame = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];

        // when (操作):
        let (decoded, _) = try_decode_one(&frame, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();

        // then (期待する結果):
        assert_eq!(decoded.payload, b"Hello");
    }

    #[test]
    fn test_decode_incomplete_returns_none_at_every_split() {
        // テスト項目: ヘッダー・拡張長・マスク・ペイロードのどこで切れても None を返す
        // given (前提条件):
        let frame = client_frame(&vec![b'x'; 300], Opcode::Text, [1, 2, 3, 4]);

        for cut in 0..frame.len() {
            // when (操作):
            let result = try_decode_one(&frame[..cut], DEFAULT_MAX_FRAME_SIZE);

            // then (期待する結果):
            assert_eq!(result, Ok(None), "cut at {}", cut);
        }
    }

    #[test]
    fn test_frame_buffer_handles_split_reads_and_multiple_frames() {
        // テスト項目: 分割された読み込みと 1 回の読み込みに含まれる複数フレームを処理できる
        // given (前提条件):
        let mut wire = client_frame(b"first", Opcode::Text, [9, 8, 7, 6]);
        wire.extend(client_frame(b"second", Opcode::Text, [1, 1, 1, 1]));
        let third = client_frame(b"third", Opcode::Text, [5, 5, 5, 5]);
        let (third_head, third_tail) = third.split_at(4);
        wire.extend_from_slice(third_head);
        let mut buffer = FrameBuffer::new();

        // when (操作):
        buffer.extend(&wire);
        let first_batch = decode_all(&mut buffer);
        let leftover = buffer.len();
        buffer.extend(third_tail);
        let second_batch = decode_all(&mut buffer);

        // then (期待する結果):
        let payloads: Vec<_> = first_batch.iter().map(|f| f.payload.clone()).collect();
        assert_eq!(payloads, vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(leftover, 4);
        assert_eq!(second_batch.len(), 1);
        assert_eq!(second_batch[0].payload, b"third");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        // テスト項目: 上限を超える長さを宣言したフレームはエラーになる
        // given (前提条件):
        let frame = client_frame(&vec![0u8; 200], Opcode::Text, [0, 0, 0, 0]);

        // when (操作):
        let result = try_decode_one(&frame, 100);

        // then (期待する結果):
        assert_eq!(
            result,
            Err(FrameError::TooLarge {
                size: 200,
                limit: 100
            })
        );
    }

    #[test]
    fn test_decode_rejects_unknown_opcode_and_reserved_bits() {
        // テスト項目: 未定義のオペコードと予約ビットはプロトコルエラーになる
        // given (前提条件):
        let unknown = [0x83, 0x80, 0, 0, 0, 0];
        let reserved = [0xC1, 0x80, 0, 0, 0, 0];

        // when (操作):
        let unknown_result = try_decode_one(&unknown, DEFAULT_MAX_FRAME_SIZE);
        let reserved_result = try_decode_one(&reserved, DEFAULT_MAX_FRAME_SIZE);

        // then (期待する結果):
        assert_eq!(unknown_result, Err(FrameError::UnknownOpcode(0x3)));
        assert_eq!(reserved_result, Err(FrameError::ReservedBits));
    }

    #[test]
    fn test_close_frame_code_round_trip() {
        // テスト項目: クローズフレームのステータスコードを取り出せる
        // given (前提条件):
        let frame = encode_close(Some(1000));

        // when (操作):
        let (decoded, _) = try_decode_one(&frame, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();

        // then (期待する結果):
        assert_eq!(decoded.opcode, Opcode::Close);
        assert_eq!(close_code(&decoded.payload), Some(1000));
        assert_eq!(close_code(&[]), None);
    }
}
