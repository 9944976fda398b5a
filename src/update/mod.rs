//! Update scheduling
//!
//! This module holds the single control loop of the bridge and the
//! collaborators it drives: an [`Updater`] that refreshes the controller
//! repository from the device, and a [`Publisher`] that pushes the repository
//! out (MQTT state, home-automation discovery, raw status messages).
//!
//! All device I/O and all publish calls happen sequentially on the loop, so
//! the connection is owned by the updater and never shared.

mod registers;
mod scheduler;

pub use self::registers::RegisterUpdater;
pub use self::scheduler::{
    refresh_channel, shutdown_signal, RefreshHandle, RefreshReceiver, Scheduler,
    OFFLINE_PAYLOAD, STATUS_TOPIC,
};

use async_trait::async_trait;

use crate::core::{ConnectionConfig, Result};
use crate::repo::ControllerRepo;

/// Refreshes the repository from the controller
#[async_trait]
pub trait Updater: Send {
    /// Full resync of every register
    async fn update_all(
        &mut self,
        repo: &mut ControllerRepo,
        connection: &ConnectionConfig,
    ) -> Result<()>;

    /// Resync of the frequently changing registers
    async fn update_state(
        &mut self,
        repo: &mut ControllerRepo,
        connection: &ConnectionConfig,
    ) -> Result<()>;

    /// Releases the controller connection on shutdown
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Pushes repository contents to the outside world.
///
/// Delivery failures are the publisher's own concern; the scheduler neither
/// observes nor retries them.
#[async_trait]
pub trait Publisher: Send {
    /// Publishes register state
    async fn publish_state(&mut self, repo: &ControllerRepo, full_refresh: bool);

    /// Publishes home-automation discovery documents
    async fn publish_discovery(&mut self, repo: &ControllerRepo, full_refresh: bool);

    /// Publishes a raw message below the bridge's topic prefix
    async fn publish_raw(&mut self, topic: &str, payload: &str, retained: bool);
}
