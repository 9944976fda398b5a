//! Byte transport to the controller
//!
//! The protocol engine only needs to write whole frames, read whatever bytes
//! arrive within a bounded time and close the link. Anything that can do that
//! implements [`Transport`]; [`Connect`] adds opening one from the connection
//! settings.

mod connection;
#[cfg(test)]
pub(crate) mod mock;

pub use self::connection::{StreamTransport, TcpTransport};

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::{ConnectionConfig, Result};

/// An open byte stream to one or more controllers
#[async_trait]
pub trait Transport: Send {
    /// Writes the whole buffer
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Reads up to `max` bytes. An empty result means the read timed out
    /// without data; a closed or failed connection is an error.
    async fn read(&mut self, max: usize) -> Result<Bytes>;

    /// Closes the connection. Calling it again is a no-op.
    async fn disconnect(&mut self) -> Result<()>;
}

/// A transport that can be opened from connection settings
#[async_trait]
pub trait Connect: Transport + Sized {
    async fn open(config: &ConnectionConfig) -> Result<Self>;
}
