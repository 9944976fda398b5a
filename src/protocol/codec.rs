use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::message::{Command, CommandKind, Frame, PayloadKind, ReadKind, Value};
use super::{
    ArrayEncoding, ACK, CODE_LEN, COUNT_LEN, EOT, HEADER_LEN, HOST_ADDRESS, LINK_ANSWER,
    LINK_REQUEST, MAX_PAYLOAD_LEN, NAK, OP_READ, SOH, STX,
};
use crate::core::{Error, Result};
use crate::util::hex;

const DEST_AT: usize = 1;
const SOURCE_AT: usize = 2;
const LINK_AT: usize = 3;
const MARKER_AT: usize = HEADER_LEN;
const SUB_MARKER_AT: usize = MARKER_AT + 1;
const CODE_AT: usize = SUB_MARKER_AT + 1;
const PAYLOAD_AT: usize = CODE_AT + CODE_LEN;

/// What remains to be collected once the frame length is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Nak,
    Data(PayloadKind),
}

/// Frame reconstruction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Looking for SOH; anything else is line noise
    AwaitStart,
    /// Header started, waiting for STX or EOT
    AwaitMarker,
    /// STX seen, waiting for ACK, NAK or a payload kind tag
    AwaitSubMarker,
    /// Variable payload, waiting for its element count
    AwaitCount(PayloadKind),
    /// Total frame length known
    AwaitTail { len: usize, tail: Tail },
}

/// Host side codec: encodes commands and reconstructs controller replies
#[derive(Debug)]
pub struct FrameCodec {
    state: State,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        FrameCodec {
            state: State::AwaitStart,
        }
    }

    /// True when no partial frame is pending
    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitStart
    }

    /// Emits the first `len` buffered bytes as a malformed frame. Header
    /// errors drop only the SOH so a real frame start inside the rejected
    /// bytes is found on the rescan.
    fn malformed(&mut self, src: &mut BytesMut, len: usize) -> Frame {
        self.state = State::AwaitStart;
        let bytes = src.split_to(len.min(src.len())).freeze();
        trace!(frame = %hex(&bytes), "malformed frame");
        Frame::Malformed(bytes)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.state {
                State::AwaitStart => {
                    match src.iter().position(|b| *b == SOH) {
                        Some(skip) => {
                            if skip > 0 {
                                trace!(noise = %hex(&src[..skip]), "discarding bytes before SOH");
                                src.advance(skip);
                            }
                        }
                        None => {
                            if !src.is_empty() {
                                trace!(noise = %hex(src), "discarding bytes before SOH");
                                src.clear();
                            }
                            return Ok(None);
                        }
                    }
                    self.state = State::AwaitMarker;
                }

                State::AwaitMarker => {
                    if src.len() <= MARKER_AT {
                        return Ok(None);
                    }
                    // Only answers addressed to the host are frames for us
                    if src[DEST_AT] != HOST_ADDRESS || src[LINK_AT] != LINK_ANSWER {
                        return Ok(Some(self.malformed(src, 1)));
                    }
                    match src[MARKER_AT] {
                        STX => self.state = State::AwaitSubMarker,
                        EOT => {
                            let source = src[SOURCE_AT];
                            src.advance(MARKER_AT + 1);
                            self.state = State::AwaitStart;
                            return Ok(Some(Frame::EndOfTransmission { source }));
                        }
                        _ => return Ok(Some(self.malformed(src, 1))),
                    }
                }

                State::AwaitSubMarker => {
                    if src.len() <= SUB_MARKER_AT {
                        return Ok(None);
                    }
                    match src[SUB_MARKER_AT] {
                        ACK => {
                            let source = src[SOURCE_AT];
                            src.advance(SUB_MARKER_AT + 1);
                            self.state = State::AwaitStart;
                            return Ok(Some(Frame::Ack { source }));
                        }
                        NAK => {
                            self.state = State::AwaitTail {
                                len: SUB_MARKER_AT + 2,
                                tail: Tail::Nak,
                            };
                        }
                        tag => match PayloadKind::from_tag(tag) {
                            Some(kind) => {
                                self.state = match kind.fixed_len() {
                                    Some(len) => State::AwaitTail {
                                        len: PAYLOAD_AT + len,
                                        tail: Tail::Data(kind),
                                    },
                                    None => State::AwaitCount(kind),
                                };
                            }
                            None => return Ok(Some(self.malformed(src, 1))),
                        },
                    }
                }

                State::AwaitCount(kind) => {
                    if src.len() < PAYLOAD_AT + COUNT_LEN {
                        return Ok(None);
                    }
                    let count = u16::from_be_bytes([src[PAYLOAD_AT], src[PAYLOAD_AT + 1]]);
                    let payload_len = kind.counted_len(count as usize);
                    if payload_len > MAX_PAYLOAD_LEN {
                        return Ok(Some(self.malformed(src, 1)));
                    }
                    self.state = State::AwaitTail {
                        len: PAYLOAD_AT + payload_len,
                        tail: Tail::Data(kind),
                    };
                }

                State::AwaitTail { len, tail } => {
                    if src.len() < len {
                        return Ok(None);
                    }
                    let frame = src.split_to(len).freeze();
                    self.state = State::AwaitStart;
                    trace!(frame = %hex(&frame), "frame complete");

                    let source = frame[SOURCE_AT];
                    let frame = match tail {
                        Tail::Nak => Frame::Nak {
                            source,
                            error_code: frame[SUB_MARKER_AT + 1],
                        },
                        Tail::Data(kind) => Frame::Data {
                            source,
                            code: u16::from_be_bytes([frame[CODE_AT], frame[CODE_AT + 1]]),
                            kind,
                            payload: frame.slice(PAYLOAD_AT..),
                        },
                    };
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Flushes a partial frame as malformed once the read attempt has ended
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            self.state = State::AwaitStart;
            return Ok(None);
        }
        let len = src.len();
        Ok(Some(self.malformed(src, len)))
    }
}

impl Encoder<Command> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(PAYLOAD_AT + 8);
        dst.put_u8(SOH);
        dst.put_u8(item.address);
        dst.put_u8(HOST_ADDRESS);
        dst.put_u8(LINK_REQUEST);
        dst.put_u8(STX);

        match item.kind {
            CommandKind::Read(kind) => {
                dst.put_u8(OP_READ);
                dst.put_u16(item.code);
                dst.put_u8(kind.payload_kind().tag());
            }
            CommandKind::WriteScalar(value) => {
                dst.put_u8(PayloadKind::Scalar.tag());
                dst.put_u16(item.code);
                Value::Scalar(value).encode(dst)?;
            }
            CommandKind::WriteText(text) => {
                dst.put_u8(PayloadKind::Text.tag());
                dst.put_u16(item.code);
                Value::Text(text).encode(dst)?;
            }
        }
        Ok(())
    }
}

/// Controller side codec: decodes commands and encodes replies.
///
/// The bridge never runs this side; it exists so the host codec can be
/// exercised against a peer speaking the same format.
#[derive(Debug, Default)]
pub struct DeviceCodec;

impl DeviceCodec {
    /// Creates a new device codec
    pub fn new() -> Self {
        DeviceCodec
    }

    /// Length of the command at the front of `src`, once enough of it is buffered
    fn command_len(src: &[u8]) -> Result<Option<usize>> {
        if src.len() <= SUB_MARKER_AT {
            return Ok(None);
        }
        if src[MARKER_AT] != STX {
            return Err(Error::framing(format!(
                "command without STX: {}",
                hex(&src[..=MARKER_AT])
            )));
        }
        let op = src[SUB_MARKER_AT];
        if op == OP_READ {
            return Ok(Some(PAYLOAD_AT + 1));
        }
        match PayloadKind::from_tag(op) {
            Some(PayloadKind::Scalar) => Ok(Some(PAYLOAD_AT + 4)),
            Some(PayloadKind::Text) => {
                if src.len() < PAYLOAD_AT + COUNT_LEN {
                    return Ok(None);
                }
                let count = u16::from_be_bytes([src[PAYLOAD_AT], src[PAYLOAD_AT + 1]]);
                Ok(Some(PAYLOAD_AT + PayloadKind::Text.counted_len(count as usize)))
            }
            _ => Err(Error::framing(format!("unknown command op {:#04x}", op))),
        }
    }
}

fn read_kind(kind: PayloadKind) -> ReadKind {
    match kind {
        PayloadKind::Scalar => ReadKind::Scalar,
        PayloadKind::Text => ReadKind::Text,
        PayloadKind::ShortArray => ReadKind::Array(ArrayEncoding::ShortArray),
        PayloadKind::ByteArray => ReadKind::Array(ArrayEncoding::ByteArray),
        PayloadKind::TwoByteArray => ReadKind::Array(ArrayEncoding::TwoByteArray),
        PayloadKind::BoolArray => ReadKind::Array(ArrayEncoding::BoolArray),
    }
}

impl Decoder for DeviceCodec {
    type Item = Command;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match src.iter().position(|b| *b == SOH) {
            Some(skip) => src.advance(skip),
            None => {
                src.clear();
                return Ok(None);
            }
        }

        let len = match Self::command_len(src) {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(None),
            Err(e) => {
                src.advance(1);
                return Err(e);
            }
        };
        if src.len() < len {
            return Ok(None);
        }

        let frame = src.split_to(len).freeze();
        let address = frame[1];
        let op = frame[SUB_MARKER_AT];
        let code = u16::from_be_bytes([frame[CODE_AT], frame[CODE_AT + 1]]);
        let payload = &frame[PAYLOAD_AT..];

        let kind = if op == OP_READ {
            let kind = PayloadKind::from_tag(payload[0]).ok_or_else(|| {
                Error::framing(format!("unknown read kind {:#04x}", payload[0]))
            })?;
            CommandKind::Read(read_kind(kind))
        } else {
            match Value::decode(PayloadKind::from_tag(op).unwrap_or(PayloadKind::Scalar), payload)? {
                Value::Scalar(value) => CommandKind::WriteScalar(value),
                Value::Text(text) => CommandKind::WriteText(text),
                Value::Array(_) => return Err(Error::framing("array writes are not supported")),
            }
        };

        Ok(Some(Command { address, code, kind }))
    }
}

impl Encoder<Frame> for DeviceCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        let source = match &item {
            Frame::Malformed(bytes) => {
                dst.extend_from_slice(bytes);
                return Ok(());
            }
            Frame::Ack { source }
            | Frame::Nak { source, .. }
            | Frame::Data { source, .. }
            | Frame::EndOfTransmission { source } => *source,
        };

        dst.put_u8(SOH);
        dst.put_u8(HOST_ADDRESS);
        dst.put_u8(source);
        dst.put_u8(LINK_ANSWER);

        match item {
            Frame::Ack { .. } => {
                dst.put_u8(STX);
                dst.put_u8(ACK);
            }
            Frame::Nak { error_code, .. } => {
                dst.put_u8(STX);
                dst.put_u8(NAK);
                dst.put_u8(error_code);
            }
            Frame::Data {
                code, kind, payload, ..
            } => {
                dst.put_u8(STX);
                dst.put_u8(kind.tag());
                dst.put_u16(code);
                dst.extend_from_slice(&payload);
            }
            Frame::EndOfTransmission { .. } => dst.put_u8(EOT),
            Frame::Malformed(_) => {}
        }
        Ok(())
    }
}
