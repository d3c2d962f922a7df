//! Wire codecs
//!
//! # Binary layout (raw socket transport)
//!
//! ```text
//! 0      1        3      4         6                    10
//! +------+--------+------+---------+--------------------+-----------
//! | ver  |  cmd   | seq  | opcode  | flag:u8 | len:u24  | payload
//! +------+--------+------+---------+--------------------+-----------
//! ```
//!
//! All integers are big-endian. A non-zero `flag` marks an LZ4 block whose
//! first 4 bytes declare the uncompressed size. The payload itself is a
//! MessagePack document.
//!
//! # JSON layout (WebSocket transport)
//!
//! One text message per frame: `{"ver", "cmd", "seq", "opcode", "payload"}`.

use super::frame::{Frame, SequenceWidth};
use super::value::{from_msgpack, to_msgpack};
use crate::{MaxWireError, Result};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Fixed binary header length
pub const HEADER_LEN: usize = 10;

/// Largest payload the 24-bit length field can describe
pub const MAX_PAYLOAD_LEN: usize = 0x00FF_FFFF;

/// Ceiling for a declared uncompressed size
pub const MAX_DECOMPRESSED_SIZE: usize = 10 * 1024 * 1024;

const COMPRESSED_FLAG: u8 = 0x01;

/// Payload compression on the encode side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Lz4,
}

/// Parsed binary header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub ver: u8,
    pub cmd: u16,
    pub seq: u8,
    pub opcode: u16,
    pub flag: u8,
    pub payload_len: usize,
}

impl FrameHeader {
    pub fn parse(buf: &[u8; HEADER_LEN]) -> Self {
        let packed = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
        Self {
            ver: buf[0],
            cmd: u16::from_be_bytes([buf[1], buf[2]]),
            seq: buf[3],
            opcode: u16::from_be_bytes([buf[4], buf[5]]),
            flag: (packed >> 24) as u8,
            payload_len: (packed & 0x00FF_FFFF) as usize,
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let packed = ((self.flag as u32) << 24) | (self.payload_len as u32 & 0x00FF_FFFF);
        out.push(self.ver);
        out.extend_from_slice(&self.cmd.to_be_bytes());
        out.push(self.seq);
        out.extend_from_slice(&self.opcode.to_be_bytes());
        out.extend_from_slice(&packed.to_be_bytes());
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.flag != 0
    }
}

/// Codec for the raw socket transport
pub struct BinaryCodec;

impl BinaryCodec {
    /// Encode a frame without compression
    pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
        Self::encode_with(frame, Compression::None)
    }

    /// Encode a frame, optionally compressing the payload
    ///
    /// The sequence number is truncated to one byte.
    pub fn encode_with(frame: &Frame, compression: Compression) -> Result<Vec<u8>> {
        let raw = to_msgpack(&frame.payload)?;
        let (flag, body) = match compression {
            Compression::None => (0, raw),
            Compression::Lz4 => (COMPRESSED_FLAG, compress_payload(&raw)?),
        };
        if body.len() > MAX_PAYLOAD_LEN {
            return Err(MaxWireError::Encode(format!(
                "payload of {} bytes exceeds the 24-bit length field",
                body.len()
            )));
        }

        let header = FrameHeader {
            ver: frame.ver,
            cmd: frame.cmd,
            seq: SequenceWidth::OneByte.wrap(frame.seq) as u8,
            opcode: frame.opcode,
            flag,
            payload_len: body.len(),
        };

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        header.write(&mut out);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode one complete frame from a buffer
    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        let header_bytes: &[u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| {
                MaxWireError::Decode(format!("short header: {} bytes", bytes.len()))
            })?;
        let header = FrameHeader::parse(header_bytes);

        let body = bytes
            .get(HEADER_LEN..HEADER_LEN + header.payload_len)
            .ok_or_else(|| {
                MaxWireError::Decode(format!(
                    "truncated payload: want {}, have {}",
                    header.payload_len,
                    bytes.len() - HEADER_LEN
                ))
            })?;

        let payload = Self::decode_payload(&header, body)?;
        Ok(Frame::new(
            header.ver,
            header.cmd,
            header.seq as u64,
            header.opcode,
            payload,
        ))
    }

    /// Decode the payload segment described by `header`
    pub fn decode_payload(header: &FrameHeader, body: &[u8]) -> Result<Value> {
        if body.is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        if header.is_compressed() {
            let raw = decompress_payload(body)?;
            from_msgpack(&raw)
        } else {
            from_msgpack(body)
        }
    }
}

/// LZ4-compress `raw`, prefixed with its 4-byte big-endian size
pub fn compress_payload(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.len() > MAX_DECOMPRESSED_SIZE {
        return Err(MaxWireError::Encode(format!(
            "payload of {} bytes exceeds the decompression ceiling",
            raw.len()
        )));
    }
    let compressed = lz4_flex::block::compress(raw);
    let mut out = Vec::with_capacity(4 + compressed.len());
    out.extend_from_slice(&(raw.len() as u32).to_be_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Inverse of [`compress_payload`]; the declared size is checked before
/// any allocation
pub fn decompress_payload(segment: &[u8]) -> Result<Vec<u8>> {
    let (size, block) = match segment {
        [a, b, c, d, rest @ ..] => (u32::from_be_bytes([*a, *b, *c, *d]) as usize, rest),
        _ => {
            return Err(MaxWireError::Decode(
                "compressed segment shorter than its size prefix".into(),
            ))
        }
    };
    if size > MAX_DECOMPRESSED_SIZE {
        return Err(MaxWireError::Decode(format!(
            "declared uncompressed size {} exceeds ceiling {}",
            size, MAX_DECOMPRESSED_SIZE
        )));
    }

    let raw = lz4_flex::block::decompress(block, size)
        .map_err(|e| MaxWireError::Decode(format!("lz4: {}", e)))?;
    if raw.len() != size {
        return Err(MaxWireError::Decode(format!(
            "lz4 produced {} bytes, header declared {}",
            raw.len(),
            size
        )));
    }
    Ok(raw)
}

/// Read one binary frame from a byte stream
///
/// A short read on the header or payload means the peer went away mid-frame
/// and the stream can no longer be trusted: that is reported as
/// `ConnectionClosed`. A payload that was read in full but fails to decode
/// leaves the stream aligned on the next header and is reported as `Decode`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header_buf)
        .await
        .map_err(|e| MaxWireError::io("read header", e))?;
    let header = FrameHeader::parse(&header_buf);

    let mut body = vec![0u8; header.payload_len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| MaxWireError::io("read payload", e))?;

    let payload = BinaryCodec::decode_payload(&header, &body)?;
    Ok(Frame::new(
        header.ver,
        header.cmd,
        header.seq as u64,
        header.opcode,
        payload,
    ))
}

/// Codec for the WebSocket transport
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode(frame: &Frame) -> Result<String> {
        serde_json::to_string(frame).map_err(|e| MaxWireError::Encode(format!("json: {}", e)))
    }

    pub fn decode(text: &str) -> Result<Frame> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| MaxWireError::Decode(format!("json: {}", e)))?;
        Ok(Frame::new(
            frame.ver,
            frame.cmd,
            frame.seq,
            frame.opcode,
            frame.payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::opcode;
    use serde_json::json;

    fn sample() -> Frame {
        Frame::new(
            10,
            1,
            200,
            opcode::LOGIN,
            json!({"chats": [{"id": 1, "type": "DIALOG"}], "profile": {"contact": {"id": 9}}}),
        )
    }

    #[test]
    fn test_header_layout() {
        let bytes = BinaryCodec::encode(&Frame::new(10, 0x0102, 7, 0x0304, json!({}))).unwrap();
        assert_eq!(&bytes[..6], &[10, 0x01, 0x02, 7, 0x03, 0x04]);
        assert_eq!(bytes[6], 0, "send path never sets the compression flag");
        let len = u32::from_be_bytes([0, bytes[7], bytes[8], bytes[9]]) as usize;
        assert_eq!(len, bytes.len() - HEADER_LEN);
    }

    #[test]
    fn test_binary_round_trip() {
        let frame = sample();
        assert_eq!(BinaryCodec::decode(&BinaryCodec::encode(&frame).unwrap()).unwrap(), frame);
    }

    #[test]
    fn test_binary_round_trip_compressed() {
        let frame = sample();
        let bytes = BinaryCodec::encode_with(&frame, Compression::Lz4).unwrap();
        assert_ne!(bytes[6], 0);
        assert_eq!(BinaryCodec::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_sequence_truncated_to_one_byte() {
        let frame = Frame::new(10, 0, 300, opcode::PING, json!({}));
        let decoded = BinaryCodec::decode(&BinaryCodec::encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded.seq, 300 % 256);
    }

    #[test]
    fn test_empty_payload_decodes_to_empty_map() {
        let mut bytes = Vec::new();
        FrameHeader {
            ver: 10,
            cmd: 1,
            seq: 3,
            opcode: opcode::PING,
            flag: 0,
            payload_len: 0,
        }
        .write(&mut bytes);
        assert_eq!(BinaryCodec::decode(&bytes).unwrap().payload, json!({}));
    }

    #[test]
    fn test_oversized_declared_size_rejected() {
        // 11 MiB declared, a tiny block behind it
        let mut segment = (11u32 * 1024 * 1024).to_be_bytes().to_vec();
        segment.extend_from_slice(&lz4_flex::block::compress(b"tiny"));

        let mut bytes = Vec::new();
        FrameHeader {
            ver: 10,
            cmd: 1,
            seq: 1,
            opcode: opcode::NOTIF_MESSAGE,
            flag: COMPRESSED_FLAG,
            payload_len: segment.len(),
        }
        .write(&mut bytes);
        bytes.extend_from_slice(&segment);

        let err = BinaryCodec::decode(&bytes).unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().contains("exceeds ceiling"));
    }

    #[test]
    fn test_corrupt_lz4_is_decode_error() {
        let mut segment = 64u32.to_be_bytes().to_vec();
        segment.extend_from_slice(&[0xff, 0xff, 0xff, 0xff, 0x00]);
        assert!(decompress_payload(&segment).unwrap_err().is_decode());
    }

    #[test]
    fn test_json_round_trip_and_null_payload() {
        let frame = Frame::new(11, 0, 123_456, opcode::SEND_MESSAGE, json!({"chatId": 5}));
        let text = JsonCodec::encode(&frame).unwrap();
        assert_eq!(JsonCodec::decode(&text).unwrap(), frame);

        let push = JsonCodec::decode(r#"{"ver":11,"cmd":0,"seq":4,"opcode":128,"payload":null}"#)
            .unwrap();
        assert_eq!(push.payload, json!({}));
        assert!(JsonCodec::decode("not json").unwrap_err().is_decode());
    }

    #[tokio::test]
    async fn test_read_frame_from_stream() {
        let first = BinaryCodec::encode(&sample()).unwrap();
        let second = BinaryCodec::encode(&Frame::new(10, 0, 2, opcode::PING, json!({}))).unwrap();
        let mut stream: &[u8] = &[first.as_slice(), second.as_slice()].concat();

        assert_eq!(read_frame(&mut stream).await.unwrap(), sample());
        assert_eq!(read_frame(&mut stream).await.unwrap().opcode, opcode::PING);
        assert!(matches!(
            read_frame(&mut stream).await,
            Err(MaxWireError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_read_frame_short_payload_is_fatal() {
        let bytes = BinaryCodec::encode(&sample()).unwrap();
        let mut stream: &[u8] = &bytes[..bytes.len() - 3];
        let err = read_frame(&mut stream).await.unwrap_err();
        assert!(err.is_transport_fatal());
    }
}
