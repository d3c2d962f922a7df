//! Protocol frame model
//!
//! A [`Frame`] is one discrete protocol message: a small header
//! (`ver`, `cmd`, `seq`, `opcode`) plus a structured payload. The same
//! struct is used by both transports; only the wire encoding differs
//! (JSON objects over WebSocket, a packed binary header + MessagePack over
//! the raw socket).

use crate::traits::MaxWireError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Header version used by the WebSocket (JSON) transport
pub const WS_PROTOCOL_VERSION: u8 = 11;

/// Header version used by the raw socket (binary) transport
pub const SOCKET_PROTOCOL_VERSION: u8 = 10;

/// `cmd` value for client requests
pub const CMD_REQUEST: u16 = 0;

/// Opcode table for the message families the core itself issues or routes
pub mod opcode {
    pub const PING: u16 = 1;
    pub const SESSION_INIT: u16 = 6;
    pub const PROFILE: u16 = 16;
    pub const AUTH_REQUEST: u16 = 17;
    pub const AUTH: u16 = 18;
    pub const LOGIN: u16 = 19;
    pub const LOGOUT: u16 = 20;
    pub const AUTH_CONFIRM: u16 = 23;
    pub const SEND_MESSAGE: u16 = 64;
    pub const DELETE_MESSAGE: u16 = 66;
    pub const EDIT_MESSAGE: u16 = 67;
    pub const NOTIF_MESSAGE: u16 = 128;
    pub const NOTIF_CHAT: u16 = 135;
    pub const NOTIF_MSG_REACTIONS_CHANGED: u16 = 155;
}

/// Width of the sequence field on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceWidth {
    /// JSON transport: sequence numbers are unbounded integers
    Unbounded,
    /// Binary transport: one header byte, sequence wraps modulo 256
    OneByte,
}

impl SequenceWidth {
    /// Wrap a raw counter value into this width
    #[inline]
    pub fn wrap(self, raw: u64) -> u64 {
        match self {
            SequenceWidth::Unbounded => raw,
            SequenceWidth::OneByte => raw & 0xFF,
        }
    }
}

/// One protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub ver: u8,
    #[serde(default)]
    pub cmd: u16,
    #[serde(default)]
    pub seq: u64,
    pub opcode: u16,
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

impl Frame {
    /// Build a frame, normalising a `null` payload to an empty mapping
    pub fn new(ver: u8, cmd: u16, seq: u64, opcode: u16, payload: Value) -> Self {
        Self {
            ver,
            cmd,
            seq,
            opcode,
            payload: normalize(payload),
        }
    }

    /// Split a frame whose payload is a list into one frame per element
    ///
    /// Every element shares the outer header. Non-list payloads yield the
    /// frame itself.
    pub fn fan_out(self) -> Vec<Frame> {
        match self.payload {
            Value::Array(items) => items
                .into_iter()
                .map(|item| Frame {
                    ver: self.ver,
                    cmd: self.cmd,
                    seq: self.seq,
                    opcode: self.opcode,
                    payload: normalize(item),
                })
                .collect(),
            payload => vec![Frame { payload, ..self }],
        }
    }

    /// Application-level error carried in the payload, if any
    pub fn server_error(&self) -> Option<MaxWireError> {
        let error = self.payload.get("error")?;
        let error = match error {
            Value::String(s) => s.clone(),
            Value::Null => return None,
            other => other.to_string(),
        };
        let message = self
            .payload
            .get("localizedMessage")
            .or_else(|| self.payload.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(MaxWireError::Server { error, message })
    }

    /// Consume the frame, returning the payload or the server error it carries
    pub fn into_result(self) -> Result<Value, MaxWireError> {
        match self.server_error() {
            Some(err) => Err(err),
            None => Ok(self.payload),
        }
    }
}

#[inline]
fn normalize(payload: Value) -> Value {
    if payload.is_null() {
        empty_payload()
    } else {
        payload
    }
}
