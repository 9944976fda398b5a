use std::io;
use std::time::Duration;
use thiserror::Error;

/// Custom error types for the controller bridge
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed by controller")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Controller rejected request with code {code}")]
    Device { code: u8 },

    #[error("No valid reply after {attempts} frames in {elapsed:?}")]
    Timeout { attempts: u32, elapsed: Duration },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Update scheduler has stopped")]
    SchedulerStopped,

    #[error("Initial update failed after {attempts} attempts: {source}")]
    Priming {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new framing error
    pub fn framing(msg: impl Into<String>) -> Self {
        Error::Framing(msg.into())
    }

    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new device rejection error
    pub fn device(code: u8) -> Self {
        Error::Device { code }
    }

    /// Returns true when the connection can no longer be trusted and should be
    /// reopened before the next exchange.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ConnectionClosed | Error::NotConnected | Error::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::device(7);
        assert!(matches!(err, Error::Device { code: 7 }));
        assert_eq!(err.to_string(), "Controller rejected request with code 7");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_transport());
    }

    #[test]
    fn test_device_error_is_not_transport() {
        assert!(!Error::device(3).is_transport());
        assert!(!Error::protocol("bad payload").is_transport());
    }
}
