use async_trait::async_trait;
use tracing::{debug, error, info, Level};

use profilux_bridge::core::Settings;
use profilux_bridge::network::TcpTransport;
use profilux_bridge::update::{refresh_channel, shutdown_signal, RegisterUpdater};
use profilux_bridge::{ControllerRepo, Publisher, Scheduler};

/// Publisher that renders the repository into the log.
///
/// Stands in for a broker client: state goes to `info`, discovery and raw
/// messages to `debug`.
struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish_state(&mut self, repo: &ControllerRepo, full_refresh: bool) {
        match serde_json::to_string(repo) {
            Ok(json) => info!(full_refresh, registers = repo.len(), "State {}", json),
            Err(e) => error!("Unable to render state: {}", e),
        }
    }

    async fn publish_discovery(&mut self, repo: &ControllerRepo, full_refresh: bool) {
        let names: Vec<&str> = repo.iter().map(|(_, r)| r.name.as_str()).collect();
        debug!(full_refresh, "Discovery for {:?}", names);
    }

    async fn publish_raw(&mut self, topic: &str, payload: &str, retained: bool) {
        info!(retained, "{} {}", topic, payload);
    }
}

#[tokio::main]
async fn main() {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let level = settings.log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!(
        version = profilux_bridge::VERSION,
        endpoint = %settings.connection.endpoint(),
        registers = settings.registers.len(),
        "Starting bridge"
    );

    let updater = RegisterUpdater::<TcpTransport>::new(settings.registers, settings.retry);
    let scheduler = Scheduler::new(settings.connection, settings.scheduler, updater, LogPublisher);

    // Held for the lifetime of the loop; external triggers would clone it
    let (_refresh, refresh_rx) = refresh_channel();

    if let Err(e) = scheduler.run(shutdown_signal(), refresh_rx).await {
        error!("Bridge stopped: {}", e);
        std::process::exit(1);
    }
}
