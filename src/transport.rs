//! Socket layer.
//!
//! The transport knows about sockets and bytes only. TCP streams carry the
//! session; a broadcast UDP socket carries ListIdentity discovery.
//!
//! Any byte stream implementing [`AsyncStream`] can stand in for the TCP
//! connection, which is how the session is driven over in-memory pipes in
//! tests.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tracing::debug;

use crate::error::{EnipError, Result};

pub use crate::encapsulation::EIP_PORT;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest datagram accepted during discovery.
pub const MAX_PACKET_SIZE: usize = 4096;

/// Byte stream a session can run on.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Resolves `host` to its first IPv4 address.
///
/// # Errors
///
/// Returns `EnipError::InvalidParameter` when the name has no IPv4 address.
pub async fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr> {
    lookup_host((host, port))
        .await?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| EnipError::invalid_parameter("host", format!("{host} has no IPv4 address")))
}

/// Opens a TCP connection to `host:port` within `timeout`.
///
/// # Errors
///
/// Returns `EnipError::Timeout` when the deadline passes and
/// `EnipError::Io` when the connection is refused.
pub async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addr = resolve_ipv4(host, port).await?;
    debug!(%addr, "connecting");
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| EnipError::timeout(format!("TCP connect to {addr}")))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Binds an ephemeral UDP socket allowed to send broadcasts.
pub async fn broadcast_socket() -> Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// Broadcast destination for discovery.
pub fn broadcast_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::BROADCAST, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_defaults() {
        assert_eq!(EIP_PORT, 44818);
        assert_eq!(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs(10));
        assert_eq!(broadcast_addr(EIP_PORT).to_string(), "255.255.255.255:44818");
    }

    #[tokio::test]
    async fn test_resolve_literal() {
        let addr = resolve_ipv4("127.0.0.1", 44818).await.unwrap();
        assert_eq!(addr, "127.0.0.1:44818".parse().unwrap());
    }

    #[tokio::test]
    async fn test_connect_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|(_, peer)| peer) });

        let stream = connect_tcp("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        let peer = accept.await.unwrap().unwrap();
        assert_eq!(stream.local_addr().unwrap(), peer);
    }

    #[tokio::test]
    async fn test_broadcast_socket() {
        let socket = broadcast_socket().await.unwrap();
        assert!(socket.broadcast().unwrap());
    }
}
