//! ProfiLux bridge: aquarium controller to MQTT
//!
//! This library implements the controller's native binary protocol over a
//! byte stream transport and the update scheduler that keeps an in-memory
//! repository of controller registers in sync and hands it to publishers.
pub mod core;
pub mod network;
pub mod protocol;
pub mod repo;
pub mod update;
mod util;

// Re-export commonly used items
pub use crate::core::{Error, Result, Settings};
pub use crate::protocol::{Protocol, Value};
pub use crate::repo::ControllerRepo;
pub use crate::update::{Publisher, Scheduler, Updater};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
