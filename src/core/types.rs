use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::{Error, Result};
use crate::protocol::ReadKind;

/// Where the controller is reached and how reads are paced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Host name or IP of the controller (or its serial-to-network gateway)
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Address of the controller on the shared connection
    pub controller: u8,
    /// Upper bound for a single transport read
    #[serde(serialize_with = "super::serde::serialize_duration_ms")]
    #[serde(deserialize_with = "super::serde::deserialize_duration_ms")]
    pub read_timeout: Duration,
    /// Maximum number of bytes requested per transport read
    pub read_chunk: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: super::DEFAULT_PORT,
            controller: super::DEFAULT_CONTROLLER,
            read_timeout: Duration::from_secs(1),
            read_chunk: 64,
        }
    }
}

impl ConnectionConfig {
    /// Returns the `host:port` pair used to open the connection
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Bound on how long one protocol exchange may keep discarding frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum frames read while waiting for the reply
    pub max_frames: u32,
    /// Maximum time spent waiting for the reply
    #[serde(serialize_with = "super::serde::serialize_duration_ms")]
    #[serde(deserialize_with = "super::serde::deserialize_duration_ms")]
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_frames: 16,
            deadline: Duration::from_secs(10),
        }
    }
}

/// Retry policy of the startup priming phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimingPolicy {
    /// Wait between failed attempts
    #[serde(serialize_with = "super::serde::serialize_duration_ms")]
    #[serde(deserialize_with = "super::serde::deserialize_duration_ms")]
    pub backoff: Duration,
    /// Give up after this many attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for PrimingPolicy {
    fn default() -> Self {
        PrimingPolicy {
            backoff: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

/// Timer configuration of the update scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Incremental (state) refresh period
    #[serde(serialize_with = "super::serde::serialize_duration_ms")]
    #[serde(deserialize_with = "super::serde::deserialize_duration_ms")]
    pub state_interval: Duration,
    /// Full refresh period
    #[serde(serialize_with = "super::serde::serialize_duration_ms")]
    #[serde(deserialize_with = "super::serde::deserialize_duration_ms")]
    pub full_interval: Duration,
    /// Startup priming
    pub priming: PrimingPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            state_interval: Duration::from_secs(1),
            full_interval: Duration::from_secs(60),
            priming: PrimingPolicy::default(),
        }
    }
}

/// Which refresh cycles a register takes part in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Refresh {
    /// Read on full refreshes only
    Full,
    /// Read on every refresh
    State,
}

/// A register polled by the register updater
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSpec {
    /// Name under which the value is published
    pub name: String,
    /// Register code on the controller
    pub code: u16,
    /// Expected payload shape
    pub kind: ReadKind,
    /// Refresh cycle membership
    #[serde(default = "default_refresh")]
    pub refresh: Refresh,
}

fn default_refresh() -> Refresh {
    Refresh::Full
}

/// Top level settings of the bridge process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Controller connection
    pub connection: ConnectionConfig,
    /// Per-exchange retry bound
    pub retry: RetryPolicy,
    /// Timers and priming
    pub scheduler: SchedulerConfig,
    /// Register table
    pub registers: Vec<RegisterSpec>,
    /// Maximum log level
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            connection: ConnectionConfig::default(),
            retry: RetryPolicy::default(),
            scheduler: SchedulerConfig::default(),
            registers: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Parses settings from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("Invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Loads settings from the file named by `CONFIG_FILE`, falling back to defaults
    pub fn from_env() -> Result<Self> {
        match std::env::var(super::CONFIG_FILE_ENV) {
            Ok(path) if !path.is_empty() => Self::load(path),
            _ => Ok(Settings::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.connection.read_chunk == 0 {
            return Err(Error::config("connection.read_chunk must be positive"));
        }
        if self.retry.max_frames == 0 {
            return Err(Error::config("retry.max_frames must be positive"));
        }
        if self.scheduler.state_interval.is_zero() || self.scheduler.full_interval.is_zero() {
            return Err(Error::config("scheduler intervals must be positive"));
        }
        Ok(())
    }
}
