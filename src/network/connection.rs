use async_trait::async_trait;
use bytes::Bytes;
use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::{Connect, Transport};
use crate::core::{ConnectionConfig, Error, Result};

/// Upper bound for establishing the TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle time before TCP keepalive probes start
const KEEPALIVE_TIME: Duration = Duration::from_secs(10);

/// Transport over any async byte stream, with a bounded read
pub struct StreamTransport<S> {
    /// Open stream; `None` once disconnected
    stream: Option<S>,
    /// Upper bound for a single read
    read_timeout: Duration,
}

/// Transport to a controller reachable over TCP
pub type TcpTransport = StreamTransport<TcpStream>;

impl<S> StreamTransport<S> {
    /// Wraps an already open stream
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        StreamTransport {
            stream: Some(stream),
            read_timeout,
        }
    }

    /// Returns true until the transport is disconnected
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read(&mut self, max: usize) -> Result<Bytes> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        let mut buf = vec![0u8; max.max(1)];

        match timeout(self.read_timeout, stream.read(&mut buf)).await {
            Err(_) => Ok(Bytes::new()),
            Ok(Ok(0)) => Err(Error::ConnectionClosed),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Error while closing controller connection: {}", e);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Connect for TcpTransport {
    async fn open(config: &ConnectionConfig) -> Result<Self> {
        let endpoint = config.endpoint();
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("Connecting to {} timed out", endpoint),
                ))
            })??;

        stream.set_nodelay(true)?;
        SockRef::from(&stream)
            .set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))?;

        info!("Connected to controller at {}", endpoint);
        Ok(StreamTransport::new(stream, config.read_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_scripted_exchange() {
        let mock = Builder::new()
            .write(&[0x01, 0x02])
            .read(&[0x03, 0x04, 0x05])
            .build();
        let mut transport = StreamTransport::new(mock, Duration::from_secs(1));

        transport.write(&[0x01, 0x02]).await.unwrap();
        let bytes = transport.read(64).await.unwrap();
        assert_eq!(&bytes[..], &[0x03, 0x04, 0x05]);
    }

    #[tokio::test]
    async fn test_read_is_bounded_by_max() {
        let mock = Builder::new().read(&[1, 2, 3, 4]).build();
        let mut transport = StreamTransport::new(mock, Duration::from_secs(1));

        assert_eq!(&transport.read(1).await.unwrap()[..], &[1]);
        assert_eq!(&transport.read(8).await.unwrap()[..], &[2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_yields_no_bytes() {
        let (local, _remote) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(local, Duration::from_millis(500));

        let bytes = transport.read(16).await.unwrap();
        assert!(bytes.is_empty());
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_closed_peer_is_an_error() {
        let (local, remote) = tokio::io::duplex(64);
        drop(remote);
        let mut transport = StreamTransport::new(local, Duration::from_secs(1));

        assert!(matches!(transport.read(16).await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_disconnect_twice() {
        let (local, _remote) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(local, Duration::from_secs(1));

        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(transport.write(&[1]).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_tcp_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..ConnectionConfig::default()
        };

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 3];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut transport = TcpTransport::open(&config).await.unwrap();
        transport.write(&[7, 8, 9]).await.unwrap();

        let mut echoed = Vec::new();
        while echoed.len() < 3 {
            echoed.extend_from_slice(&transport.read(16).await.unwrap());
        }
        assert_eq!(echoed, vec![7, 8, 9]);

        accept.await.unwrap();
        transport.disconnect().await.unwrap();
    }
}
