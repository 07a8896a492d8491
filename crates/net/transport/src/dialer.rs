//! Socket establishment.

use std::{io, time::Duration};

use async_trait::async_trait;
use chunknet_primitives::HostAddress;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::debug;

/// A bidirectional byte stream a connection can run over.
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> AsyncIo for T {}

/// Type-erased stream returned by a [`Dialer`].
pub type BoxedIo = Box<dyn AsyncIo>;

/// Opens streams to backends.
///
/// Secure backends need a dialer that performs the TLS handshake; the
/// embedder supplies one.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Open a fresh stream to `host`.
    async fn dial(&self, host: &HostAddress) -> io::Result<BoxedIo>;
}

/// Plain TCP dialer.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    /// Create a dialer bounding each attempt by `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, host: &HostAddress) -> io::Result<BoxedIo> {
        if host.secure {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{host} requires TLS; configure a TLS-capable dialer"),
            ));
        }

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(host.authority()))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {host} timed out after {:?}", self.connect_timeout),
                )
            })??;
        stream.set_nodelay(true)?;
        debug!(%host, "dialed backend");
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_secure_host_unsupported() {
        let dialer = TcpDialer::new(Duration::from_secs(1));
        let host = HostAddress::new("localhost", 1).with_secure(true);
        let err = dialer.dial(&host).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_dials_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = HostAddress::from(listener.local_addr().unwrap());
        let dialer = TcpDialer::new(Duration::from_secs(1));
        let (dialed, accepted) = tokio::join!(dialer.dial(&host), listener.accept());
        assert!(dialed.is_ok());
        assert!(accepted.is_ok());
    }
}
