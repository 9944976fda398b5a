use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Element layout of an array register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayEncoding {
    /// Signed 8-bit elements
    ShortArray,
    /// Raw bytes
    ByteArray,
    /// Unsigned 16-bit elements
    TwoByteArray,
    /// One flag per element, bit-packed on the wire
    BoolArray,
}

impl ArrayEncoding {
    /// Payload kind carried by replies of this encoding
    pub fn payload_kind(self) -> PayloadKind {
        match self {
            ArrayEncoding::ShortArray => PayloadKind::ShortArray,
            ArrayEncoding::ByteArray => PayloadKind::ByteArray,
            ArrayEncoding::TwoByteArray => PayloadKind::TwoByteArray,
            ArrayEncoding::BoolArray => PayloadKind::BoolArray,
        }
    }
}

/// Shape of the value a read request expects back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadKind {
    Scalar,
    Text,
    Array(ArrayEncoding),
}

impl ReadKind {
    /// Payload kind carried by replies to this read
    pub fn payload_kind(self) -> PayloadKind {
        match self {
            ReadKind::Scalar => PayloadKind::Scalar,
            ReadKind::Text => PayloadKind::Text,
            ReadKind::Array(encoding) => encoding.payload_kind(),
        }
    }
}

/// Declared kind of a data payload, identified by its tag byte on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Scalar,
    Text,
    ShortArray,
    ByteArray,
    TwoByteArray,
    BoolArray,
}

impl PayloadKind {
    /// Wire tag of this kind
    pub fn tag(self) -> u8 {
        match self {
            PayloadKind::Scalar => b'I',
            PayloadKind::Text => b'S',
            PayloadKind::ShortArray => b'H',
            PayloadKind::ByteArray => b'B',
            PayloadKind::TwoByteArray => b'W',
            PayloadKind::BoolArray => b'L',
        }
    }

    /// Looks up a kind by its wire tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'I' => Some(PayloadKind::Scalar),
            b'S' => Some(PayloadKind::Text),
            b'H' => Some(PayloadKind::ShortArray),
            b'B' => Some(PayloadKind::ByteArray),
            b'W' => Some(PayloadKind::TwoByteArray),
            b'L' => Some(PayloadKind::BoolArray),
            _ => None,
        }
    }

    /// Payload length for kinds whose length does not depend on a count
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            PayloadKind::Scalar => Some(4),
            _ => None,
        }
    }

    /// Total payload length (count prefix included) for `count` elements
    pub fn counted_len(self, count: usize) -> usize {
        let body = match self {
            PayloadKind::Scalar => return 4,
            PayloadKind::Text | PayloadKind::ShortArray | PayloadKind::ByteArray => count,
            PayloadKind::TwoByteArray => count * 2,
            PayloadKind::BoolArray => count.div_ceil(8),
        };
        super::COUNT_LEN + body
    }
}

/// Decoded array register contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ArrayValue {
    Short(Vec<i8>),
    Bytes(Vec<u8>),
    TwoByte(Vec<u16>),
    Bool(Vec<bool>),
}

impl ArrayValue {
    /// Encoding that produces this array
    pub fn encoding(&self) -> ArrayEncoding {
        match self {
            ArrayValue::Short(_) => ArrayEncoding::ShortArray,
            ArrayValue::Bytes(_) => ArrayEncoding::ByteArray,
            ArrayValue::TwoByte(_) => ArrayEncoding::TwoByteArray,
            ArrayValue::Bool(_) => ArrayEncoding::BoolArray,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Short(v) => v.len(),
            ArrayValue::Bytes(v) => v.len(),
            ArrayValue::TwoByte(v) => v.len(),
            ArrayValue::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A register value as carried by a data payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(i32),
    Text(String),
    Array(ArrayValue),
}

impl Value {
    /// Payload kind this value is encoded as
    pub fn payload_kind(&self) -> PayloadKind {
        match self {
            Value::Scalar(_) => PayloadKind::Scalar,
            Value::Text(_) => PayloadKind::Text,
            Value::Array(array) => array.encoding().payload_kind(),
        }
    }

    /// Appends the payload (count prefix included) to `dst`
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        match self {
            Value::Scalar(v) => dst.put_i32(*v),
            Value::Text(text) => {
                put_count(text.len(), dst)?;
                dst.extend_from_slice(text.as_bytes());
            }
            Value::Array(ArrayValue::Short(v)) => {
                put_count(v.len(), dst)?;
                v.iter().for_each(|e| dst.put_i8(*e));
            }
            Value::Array(ArrayValue::Bytes(v)) => {
                put_count(v.len(), dst)?;
                dst.extend_from_slice(v);
            }
            Value::Array(ArrayValue::TwoByte(v)) => {
                put_count(v.len(), dst)?;
                v.iter().for_each(|e| dst.put_u16(*e));
            }
            Value::Array(ArrayValue::Bool(v)) => {
                put_count(v.len(), dst)?;
                for chunk in v.chunks(8) {
                    let packed = chunk
                        .iter()
                        .enumerate()
                        .fold(0u8, |acc, (bit, set)| acc | (u8::from(*set) << bit));
                    dst.put_u8(packed);
                }
            }
        }
        Ok(())
    }

    /// Decodes a complete payload of the given declared kind
    pub fn decode(kind: PayloadKind, raw: &[u8]) -> Result<Self> {
        let mut src = raw;
        if let Some(len) = kind.fixed_len() {
            if src.len() != len {
                return Err(Error::framing(format!(
                    "{:?} payload has {} bytes, expected {}",
                    kind,
                    src.len(),
                    len
                )));
            }
            return Ok(Value::Scalar(src.get_i32()));
        }

        if src.len() < super::COUNT_LEN {
            return Err(Error::framing("payload is missing its element count"));
        }
        let count = src.get_u16() as usize;
        let expected = kind.counted_len(count) - super::COUNT_LEN;
        if src.len() != expected {
            return Err(Error::framing(format!(
                "{:?} payload of {} elements has {} bytes, expected {}",
                kind,
                count,
                src.len(),
                expected
            )));
        }

        let value = match kind {
            PayloadKind::Scalar => return Err(Error::framing("scalar payload with element count")),
            PayloadKind::Text => {
                let text = String::from_utf8_lossy(src);
                Value::Text(text.trim_end_matches('\0').to_string())
            }
            PayloadKind::ShortArray => {
                Value::Array(ArrayValue::Short(src.iter().map(|b| *b as i8).collect()))
            }
            PayloadKind::ByteArray => Value::Array(ArrayValue::Bytes(src.to_vec())),
            PayloadKind::TwoByteArray => Value::Array(ArrayValue::TwoByte(
                src.chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect(),
            )),
            PayloadKind::BoolArray => Value::Array(ArrayValue::Bool(
                (0..count).map(|i| src[i / 8] & (1 << (i % 8)) != 0).collect(),
            )),
        };
        Ok(value)
    }
}

fn put_count(count: usize, dst: &mut BytesMut) -> Result<()> {
    let count = u16::try_from(count)
        .map_err(|_| Error::protocol(format!("{} elements do not fit in one frame", count)))?;
    dst.put_u16(count);
    Ok(())
}

/// What a command asks the controller to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    WriteScalar(i32),
    WriteText(String),
    Read(ReadKind),
}

/// A single request addressed to one controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Controller address on the shared connection
    pub address: u8,
    /// Register code
    pub code: u16,
    /// Operation and, for writes, the value
    pub kind: CommandKind,
}

impl Command {
    pub fn write_scalar(address: u8, code: u16, value: i32) -> Self {
        Command { address, code, kind: CommandKind::WriteScalar(value) }
    }

    pub fn write_text(address: u8, code: u16, text: impl Into<String>) -> Self {
        Command { address, code, kind: CommandKind::WriteText(text.into()) }
    }

    pub fn read(address: u8, code: u16, kind: ReadKind) -> Self {
        Command { address, code, kind: CommandKind::Read(kind) }
    }

    /// True for commands answered by an acknowledge rather than data
    pub fn is_write(&self) -> bool {
        !matches!(self.kind, CommandKind::Read(_))
    }
}

/// One classified frame received from the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Positive acknowledge of a write
    Ack { source: u8 },
    /// Negative acknowledge with the controller's error code
    Nak { source: u8, error_code: u8 },
    /// Register data; `payload` still carries its count prefix
    Data {
        source: u8,
        code: u16,
        kind: PayloadKind,
        payload: Bytes,
    },
    /// Explicit end of transmission
    EndOfTransmission { source: u8 },
    /// Bytes that do not form a valid frame (short, no start of data, unknown sub-marker)
    Malformed(Bytes),
}

impl Frame {
    /// Builds a data frame carrying `value`
    pub fn data(source: u8, code: u16, value: &Value) -> Result<Self> {
        let mut payload = BytesMut::new();
        value.encode(&mut payload)?;
        Ok(Frame::Data {
            source,
            code,
            kind: value.payload_kind(),
            payload: payload.freeze(),
        })
    }

    /// Controller that sent the frame, if it could be parsed
    pub fn source(&self) -> Option<u8> {
        match self {
            Frame::Ack { source }
            | Frame::Nak { source, .. }
            | Frame::Data { source, .. }
            | Frame::EndOfTransmission { source } => Some(*source),
            Frame::Malformed(_) => None,
        }
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Frame::Ack { .. } => "ACK",
            Frame::Nak { .. } => "NAK",
            Frame::Data { .. } => "DATA",
            Frame::EndOfTransmission { .. } => "EOT",
            Frame::Malformed(_) => "MALFORMED",
        }
    }
}
