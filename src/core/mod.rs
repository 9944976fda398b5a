//! Core types and traits for the controller bridge
//!
//! This module contains the error type, configuration and the constants
//! shared by the protocol engine and the update scheduler.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{
    ConnectionConfig, PrimingPolicy, Refresh, RegisterSpec, RetryPolicy, SchedulerConfig,
    Settings,
};

/// Default TCP port of the controller's native protocol
pub const DEFAULT_PORT: u16 = 80;

/// Default controller address on a shared connection
pub const DEFAULT_CONTROLLER: u8 = 1;

/// Environment variable naming the settings file
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";
