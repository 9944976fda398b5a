use bytes::{Bytes, BytesMut};
use tokio::time::{timeout, Instant};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use super::codec::FrameCodec;
use super::message::{ArrayEncoding, ArrayValue, Command, CommandKind, Frame, ReadKind, Value};
use crate::core::{Error, Result, RetryPolicy};
use crate::network::Transport;
use crate::util::hex;

/// Default number of bytes requested per transport read
pub const DEFAULT_READ_CHUNK: usize = 64;

/// What to do with a frame received during an exchange
#[derive(Debug)]
enum Step {
    /// The exchange is answered
    Done(Option<Value>),
    /// Not our answer; keep reading
    Skip(Error),
    /// The exchange failed and must not be retried
    Fail(Error),
}

/// Decides what a received frame means for the exchange of `code` with the
/// controller at `address`. `expected` is the requested kind for reads and
/// `None` for writes.
fn classify(frame: Frame, address: u8, code: u16, expected: Option<ReadKind>) -> Step {
    match (frame, expected) {
        (frame, _) if frame.source().map_or(false, |source| source != address) => {
            Step::Skip(Error::framing(format!(
                "{} from controller {} while waiting for {}",
                frame.label(),
                frame.source().unwrap_or_default(),
                address
            )))
        }
        (Frame::Nak { error_code, .. }, _) => Step::Fail(Error::device(error_code)),
        (Frame::Ack { .. }, None) => Step::Done(None),
        (Frame::Ack { .. }, Some(_)) => {
            Step::Skip(Error::framing("acknowledge received for a read"))
        }
        (Frame::Data { code: reply_code, .. }, None) => Step::Skip(Error::framing(format!(
            "data for register {} received for a write",
            reply_code
        ))),
        (Frame::Data { code: reply_code, .. }, Some(_)) if reply_code != code => {
            Step::Skip(Error::framing(format!(
                "reply for register {} while waiting for {}",
                reply_code, code
            )))
        }
        (Frame::Data { kind, payload, .. }, Some(wanted)) => {
            if kind != wanted.payload_kind() {
                return Step::Fail(Error::protocol(format!(
                    "register {} answered with {:?}, expected {:?}",
                    code, kind, wanted
                )));
            }
            match Value::decode(kind, &payload) {
                Ok(value) => Step::Done(Some(value)),
                Err(e) => Step::Skip(e),
            }
        }
        (Frame::EndOfTransmission { .. }, _) => Step::Skip(Error::framing("end of transmission")),
        (Frame::Malformed(bytes), _) if bytes.is_empty() => {
            Step::Skip(Error::framing("no reply within read timeout"))
        }
        (Frame::Malformed(bytes), _) => {
            Step::Skip(Error::framing(format!("malformed frame {}", hex(&bytes))))
        }
    }
}

/// Request/reply engine over one exclusively owned connection.
///
/// Each operation sends one command and then reads frames until the answer
/// arrives, the controller rejects the command, the transport fails, or the
/// retry policy is exhausted. Frames meant for other exchanges on a shared
/// connection are discarded.
pub struct Protocol<T> {
    /// Connection to the controller
    transport: T,
    /// Target controller address
    address: u8,
    /// Frame codec
    codec: FrameCodec,
    /// Bytes read but not yet framed
    buffer: BytesMut,
    /// Bound on discarded frames per exchange
    retry: RetryPolicy,
    /// Bytes requested per read
    read_chunk: usize,
    /// Cleared by `disconnect`
    connected: bool,
}

impl<T: Transport> Protocol<T> {
    /// Creates an engine talking to the controller at `address`
    pub fn new(transport: T, address: u8, retry: RetryPolicy) -> Self {
        Protocol {
            transport,
            address,
            codec: FrameCodec::new(),
            buffer: BytesMut::with_capacity(256),
            retry,
            read_chunk: DEFAULT_READ_CHUNK,
            connected: true,
        }
    }

    /// Sets how many bytes are requested per transport read
    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk.max(1);
        self
    }

    /// Target controller address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Returns true until `disconnect` is called
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Writes a scalar register
    pub async fn send_scalar(&mut self, code: u16, value: i32) -> Result<()> {
        let command = Command::write_scalar(self.address, code, value);
        self.exchange(command).await.map(|_| ())
    }

    /// Writes a text register
    pub async fn send_text(&mut self, code: u16, text: &str) -> Result<()> {
        let command = Command::write_text(self.address, code, text);
        self.exchange(command).await.map(|_| ())
    }

    /// Reads a scalar register
    pub async fn get_scalar(&mut self, code: u16) -> Result<i32> {
        match self.get_value(code, ReadKind::Scalar).await? {
            Value::Scalar(value) => Ok(value),
            other => Err(Error::protocol(format!("expected scalar, got {:?}", other))),
        }
    }

    /// Reads a text register
    pub async fn get_text(&mut self, code: u16) -> Result<String> {
        match self.get_value(code, ReadKind::Text).await? {
            Value::Text(text) => Ok(text),
            other => Err(Error::protocol(format!("expected text, got {:?}", other))),
        }
    }

    /// Reads an array register in the given encoding
    pub async fn get_array(&mut self, code: u16, encoding: ArrayEncoding) -> Result<ArrayValue> {
        match self.get_value(code, ReadKind::Array(encoding)).await? {
            Value::Array(array) => Ok(array),
            other => Err(Error::protocol(format!("expected array, got {:?}", other))),
        }
    }

    /// Reads a register of any kind
    pub async fn get_value(&mut self, code: u16, kind: ReadKind) -> Result<Value> {
        let command = Command::read(self.address, code, kind);
        self.exchange(command)
            .await?
            .ok_or_else(|| Error::protocol("read completed without data"))
    }

    /// Closes the connection. Later calls do nothing.
    pub async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.buffer.clear();
        self.codec = FrameCodec::new();
        self.transport.disconnect().await
    }

    async fn exchange(&mut self, command: Command) -> Result<Option<Value>> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let code = command.code;
        let expected = match command.kind {
            CommandKind::Read(kind) => Some(kind),
            _ => None,
        };

        let mut out = BytesMut::new();
        self.codec.encode(command, &mut out)?;
        trace!(code, frame = %hex(&out), "sending command");
        self.transport.write(&out).await?;

        let started = Instant::now();
        let mut attempts = 0;
        loop {
            let remaining = self.retry.deadline.saturating_sub(started.elapsed());
            if attempts >= self.retry.max_frames || remaining.is_zero() {
                warn!(code, attempts, "no valid reply from controller");
                return Err(Error::Timeout {
                    attempts,
                    elapsed: started.elapsed(),
                });
            }
            attempts += 1;

            let frame = match timeout(remaining, self.next_frame()).await {
                Ok(frame) => frame?,
                Err(_) => continue,
            };

            let label = frame.label();
            match classify(frame, self.address, code, expected) {
                Step::Done(value) => return Ok(value),
                Step::Fail(e) => {
                    warn!(code, "exchange failed: {}", e);
                    return Err(e);
                }
                Step::Skip(reason) => {
                    debug!(code, attempts, frame = label, "ignoring frame: {}", reason)
                }
            }
        }
    }

    /// Reads until one frame is complete or a read attempt ends without one
    async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(frame);
            }

            let bytes = self.transport.read(self.read_chunk).await?;
            if bytes.is_empty() {
                let frame = self.codec.decode_eof(&mut self.buffer)?;
                return Ok(frame.unwrap_or_else(|| Frame::Malformed(Bytes::new())));
            }
            self.buffer.extend_from_slice(&bytes);
        }
    }
}
