//! Frame model and wire codecs

pub mod codec;
pub mod frame;
pub mod value;

pub use codec::{
    compress_payload, decompress_payload, read_frame, BinaryCodec, Compression, FrameHeader,
    JsonCodec, HEADER_LEN, MAX_DECOMPRESSED_SIZE, MAX_PAYLOAD_LEN,
};
pub use frame::{
    opcode, Frame, SequenceWidth, CMD_REQUEST, SOCKET_PROTOCOL_VERSION, WS_PROTOCOL_VERSION,
};
pub use value::{from_msgpack, to_msgpack};
