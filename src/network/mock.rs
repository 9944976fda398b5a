//! Scripted transport used by the engine and updater tests

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::codec::Encoder;

use super::{Connect, Transport};
use crate::core::{ConnectionConfig, Error, Result};
use crate::protocol::{DeviceCodec, Frame};

/// One scripted read result
pub enum Step {
    Bytes(Bytes),
    Fail(std::io::ErrorKind),
}

/// Counters shared with the test after the transport moves into an engine
#[derive(Debug, Default, Clone)]
pub struct Probe {
    pub reads: Arc<AtomicUsize>,
    pub disconnects: Arc<AtomicUsize>,
    pub written: Arc<Mutex<Vec<Bytes>>>,
}

impl Probe {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.written.lock().unwrap().len()
    }
}

/// Transport replaying scripted reads; an exhausted script reads as a timeout
pub struct ScriptedTransport {
    steps: VecDeque<Step>,
    delay: Duration,
    probe: Probe,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        ScriptedTransport {
            steps: VecDeque::new(),
            delay: Duration::ZERO,
            probe: Probe::default(),
        }
    }

    /// Makes every read take `delay` before returning
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queues the wire encoding of `frame` as one read
    pub fn frame(self, frame: Frame) -> Self {
        let mut buf = BytesMut::new();
        DeviceCodec::new().encode(frame, &mut buf).unwrap();
        self.bytes(&buf)
    }

    /// Queues raw bytes as one read
    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.steps.push_back(Step::Bytes(Bytes::copy_from_slice(bytes)));
        self
    }

    /// Queues a read failure
    pub fn fail(mut self, kind: std::io::ErrorKind) -> Self {
        self.steps.push_back(Step::Fail(kind));
        self
    }

    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.probe.written.lock().unwrap().push(Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn read(&mut self, _max: usize) -> Result<Bytes> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.steps.pop_front() {
            Some(Step::Bytes(bytes)) => Ok(bytes),
            Some(Step::Fail(kind)) => Err(Error::Io(std::io::Error::new(kind, "scripted failure"))),
            None => Ok(Bytes::new()),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Connect for ScriptedTransport {
    async fn open(config: &ConnectionConfig) -> Result<Self> {
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("no controller at {}", config.endpoint()),
        )))
    }
}
