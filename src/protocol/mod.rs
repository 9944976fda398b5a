//! Native controller protocol
//!
//! This module defines the command and reply frames of the controller's
//! native binary protocol, the codecs that put them on the wire and pull them
//! back out of an unframed byte stream, and the engine that runs one
//! request/reply exchange at a time.
//!
//! ```text
//! ┌─────┬──────┬─────┬──────┬────────┬─────────────┬──────────────────┐
//! │ SOH │ dest │ src │ link │ STX/EOT│ sub-marker  │ code + payload   │
//! └─────┴──────┴─────┴──────┴────────┴─────────────┴──────────────────┘
//! ```
//!
//! There is no length prefix: completeness is decided by the marker,
//! the sub-marker and the payload kind.

pub mod codec;
pub mod engine;
pub mod message;

pub use self::codec::{DeviceCodec, FrameCodec};
pub use self::engine::Protocol;
pub use self::message::{
    ArrayEncoding, ArrayValue, Command, CommandKind, Frame, PayloadKind, ReadKind, Value,
};

/// Start of header
pub const SOH: u8 = 0x01;
/// Start of data
pub const STX: u8 = 0x02;
/// End of transmission
pub const EOT: u8 = 0x04;
/// Acknowledge
pub const ACK: u8 = 0x06;
/// Negative acknowledge
pub const NAK: u8 = 0x15;

/// Link byte of host requests
pub const LINK_REQUEST: u8 = b'Q';
/// Link byte of controller answers
pub const LINK_ANSWER: u8 = b'A';
/// Request op of a read
pub const OP_READ: u8 = b'R';

/// Address of the host on the shared connection
pub const HOST_ADDRESS: u8 = 0x00;

/// Bytes before the marker
pub const HEADER_LEN: usize = 4;
/// Register code width
pub const CODE_LEN: usize = 2;
/// Element count width of variable payloads
pub const COUNT_LEN: usize = 2;
/// Largest payload accepted before a frame is declared malformed
pub const MAX_PAYLOAD_LEN: usize = 8192;
