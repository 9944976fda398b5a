use async_trait::async_trait;
use tracing::{debug, warn};

use super::Updater;
use crate::core::{ConnectionConfig, Error, Refresh, RegisterSpec, Result, RetryPolicy};
use crate::network::Connect;
use crate::protocol::Protocol;
use crate::repo::ControllerRepo;

/// Updater driven by a table of registers.
///
/// The connection is opened on first use and dropped after a transport
/// failure, so the next refresh reconnects. A register the controller
/// rejects is logged and skipped without failing the refresh.
pub struct RegisterUpdater<T> {
    /// Engine over the open connection, if any
    protocol: Option<Protocol<T>>,
    /// Registers to poll
    registers: Vec<RegisterSpec>,
    /// Retry policy for newly opened connections
    retry: RetryPolicy,
}

impl<T: Connect> RegisterUpdater<T> {
    /// Creates an updater that connects lazily
    pub fn new(registers: Vec<RegisterSpec>, retry: RetryPolicy) -> Self {
        RegisterUpdater {
            protocol: None,
            registers,
            retry,
        }
    }

    /// Creates an updater over an already open engine
    pub fn with_protocol(protocol: Protocol<T>, registers: Vec<RegisterSpec>) -> Self {
        RegisterUpdater {
            protocol: Some(protocol),
            registers,
            retry: RetryPolicy::default(),
        }
    }

    /// True while an engine is held
    pub fn is_connected(&self) -> bool {
        self.protocol.as_ref().map_or(false, |p| p.is_connected())
    }

    async fn connection(&mut self, config: &ConnectionConfig) -> Result<&mut Protocol<T>> {
        let reusable = self
            .protocol
            .as_ref()
            .map_or(false, |p| p.is_connected() && p.address() == config.controller);
        if !reusable {
            self.release().await;
            let transport = T::open(config).await?;
            let protocol = Protocol::new(transport, config.controller, self.retry)
                .with_read_chunk(config.read_chunk);
            self.protocol = Some(protocol);
        }
        self.protocol.as_mut().ok_or(Error::NotConnected)
    }

    async fn release(&mut self) {
        if let Some(mut protocol) = self.protocol.take() {
            if let Err(e) = protocol.disconnect().await {
                debug!("Error while disconnecting: {}", e);
            }
        }
    }

    async fn refresh(
        &mut self,
        repo: &mut ControllerRepo,
        config: &ConnectionConfig,
        full: bool,
    ) -> Result<()> {
        let registers: Vec<RegisterSpec> = self
            .registers
            .iter()
            .filter(|r| full || r.refresh == Refresh::State)
            .cloned()
            .collect();

        let protocol = self.connection(config).await?;
        let outcome = read_registers(protocol, &registers, repo).await;

        match outcome {
            Ok(()) => {
                repo.mark_updated(full);
                Ok(())
            }
            Err(e) => {
                self.release().await;
                Err(e)
            }
        }
    }
}

/// Reads each register into the repository, stopping at the first
/// connection-level failure
async fn read_registers<T: Connect>(
    protocol: &mut Protocol<T>,
    registers: &[RegisterSpec],
    repo: &mut ControllerRepo,
) -> Result<()> {
    for register in registers {
        match protocol.get_value(register.code, register.kind).await {
            Ok(value) => repo.set(register.code, register.name.clone(), value),
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => warn!(
                register = %register.name,
                code = register.code,
                "Skipping register: {}",
                e
            ),
        }
    }
    Ok(())
}

#[async_trait]
impl<T: Connect> Updater for RegisterUpdater<T> {
    async fn update_all(
        &mut self,
        repo: &mut ControllerRepo,
        connection: &ConnectionConfig,
    ) -> Result<()> {
        self.refresh(repo, connection, true).await
    }

    async fn update_state(
        &mut self,
        repo: &mut ControllerRepo,
        connection: &ConnectionConfig,
    ) -> Result<()> {
        self.refresh(repo, connection, false).await
    }

    async fn close(&mut self) -> Result<()> {
        match self.protocol.take() {
            Some(mut protocol) => protocol.disconnect().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mock::ScriptedTransport;
    use crate::protocol::{ArrayEncoding, ArrayValue, Frame, ReadKind, Value};
    use std::io::ErrorKind;

    const ADDRESS: u8 = 1;

    fn registers() -> Vec<RegisterSpec> {
        vec![
            RegisterSpec {
                name: "name".to_string(),
                code: 10,
                kind: ReadKind::Text,
                refresh: Refresh::Full,
            },
            RegisterSpec {
                name: "temperature".to_string(),
                code: 20,
                kind: ReadKind::Scalar,
                refresh: Refresh::State,
            },
            RegisterSpec {
                name: "sockets".to_string(),
                code: 30,
                kind: ReadKind::Array(ArrayEncoding::BoolArray),
                refresh: Refresh::State,
            },
        ]
    }

    fn data(code: u16, value: Value) -> Frame {
        Frame::data(ADDRESS, code, &value).unwrap()
    }

    fn updater(transport: ScriptedTransport) -> RegisterUpdater<ScriptedTransport> {
        let protocol = Protocol::new(transport, ADDRESS, RetryPolicy::default());
        RegisterUpdater::with_protocol(protocol, registers())
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            controller: ADDRESS,
            ..ConnectionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_update_all_reads_every_register() {
        let transport = ScriptedTransport::new()
            .frame(data(10, Value::Text("Reef".to_string())))
            .frame(data(20, Value::Scalar(251)))
            .frame(data(30, Value::Array(ArrayValue::Bool(vec![true, false]))));
        let probe = transport.probe();
        let mut updater = updater(transport);
        let mut repo = ControllerRepo::new();

        updater.update_all(&mut repo, &config()).await.unwrap();
        assert_eq!(repo.len(), 3);
        assert_eq!(repo.get(20).unwrap().value, Value::Scalar(251));
        assert!(repo.last_full_update().is_some());
        assert_eq!(probe.writes(), 3);
    }

    #[tokio::test]
    async fn test_update_state_reads_state_registers_only() {
        let transport = ScriptedTransport::new()
            .frame(data(20, Value::Scalar(251)))
            .frame(data(30, Value::Array(ArrayValue::Bool(vec![true]))));
        let probe = transport.probe();
        let mut updater = updater(transport);
        let mut repo = ControllerRepo::new();

        updater.update_state(&mut repo, &config()).await.unwrap();
        assert_eq!(repo.len(), 2);
        assert!(repo.get(10).is_none());
        assert!(repo.last_full_update().is_none());
        assert_eq!(probe.writes(), 2);
    }

    #[tokio::test]
    async fn test_rejected_register_is_skipped() {
        let transport = ScriptedTransport::new()
            .frame(Frame::Nak { source: ADDRESS, error_code: 4 })
            .frame(data(20, Value::Scalar(251)))
            .frame(data(30, Value::Array(ArrayValue::Bool(vec![true]))));
        let mut updater = updater(transport);
        let mut repo = ControllerRepo::new();

        updater.update_all(&mut repo, &config()).await.unwrap();
        assert!(repo.get(10).is_none());
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_drops_connection() {
        let transport = ScriptedTransport::new()
            .frame(data(10, Value::Text("Reef".to_string())))
            .fail(ErrorKind::BrokenPipe);
        let probe = transport.probe();
        let mut updater = updater(transport);
        let mut repo = ControllerRepo::new();

        let err = updater.update_all(&mut repo, &config()).await.unwrap_err();
        assert!(err.is_transport());
        assert!(!updater.is_connected());
        assert_eq!(probe.disconnects(), 1);
        assert_eq!(repo.len(), 1);

        // The next refresh tries to reconnect
        let err = updater.update_state(&mut repo, &config()).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_close_disconnects_once() {
        let transport = ScriptedTransport::new();
        let probe = transport.probe();
        let mut updater = updater(transport);

        updater.close().await.unwrap();
        updater.close().await.unwrap();
        assert_eq!(probe.disconnects(), 1);
    }
}
