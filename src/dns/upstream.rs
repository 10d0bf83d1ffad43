//! Upstream resolver exchange.
//!
//! Provides abstraction over the upstream round trip to enable:
//! - Testing the proxy loop with mock upstreams
//! - Swapping the transport without touching the loop

use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{NetworkError, Result};

/// Size of the buffer used to receive upstream replies.
///
/// Larger than the plain UDP limit because client queries are relayed
/// verbatim, EDNS0 payload size included.
pub const MAX_UPSTREAM_REPLY_SIZE: usize = 4096;

/// Trait for exchanging raw DNS datagrams with an upstream resolver.
pub trait Upstream: Send + Sync + 'static {
    /// Send `query` unmodified and return the single reply datagram.
    fn exchange(&self, query: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Upstream resolver reached over one connected UDP socket.
///
/// The socket is bound to the unspecified address of the resolver's family
/// and connected to it, so datagrams from other peers are filtered out by
/// the kernel.
pub struct UdpUpstream {
    socket: UdpSocket,
    addr: SocketAddr,
    timeout: Option<Duration>,
}

impl UdpUpstream {
    /// Open the upstream socket.
    ///
    /// With `timeout` set to `None` a reply is awaited indefinitely.
    pub async fn connect(addr: SocketAddr, timeout: Option<Duration>) -> Result<Self> {
        let local: SocketAddr = match addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: local,
                source,
            })?;
        socket
            .connect(addr)
            .await
            .map_err(|source| NetworkError::Connect { addr, source })?;

        Ok(Self {
            socket,
            addr,
            timeout,
        })
    }

    /// Wait for a reply carrying the same transaction id as the query.
    ///
    /// Replies with another id belong to exchanges that were abandoned
    /// earlier and are dropped.
    async fn recv_reply(&self, query: &[u8]) -> Result<Vec<u8>> {
        let expected_id = query.get(..2);
        let mut buf = vec![0u8; MAX_UPSTREAM_REPLY_SIZE];
        loop {
            let len = self.socket.recv(&mut buf).await?;
            let reply = &buf[..len];
            if expected_id.is_none_or(|id| reply.starts_with(id)) {
                return Ok(reply.to_vec());
            }
            debug!(len, upstream = %self.addr, "discarding upstream reply with stale id");
        }
    }
}

impl Upstream for UdpUpstream {
    async fn exchange(&self, query: &[u8]) -> Result<Vec<u8>> {
        self.socket.send(query).await?;

        match self.timeout {
            None => self.recv_reply(query).await,
            Some(limit) => tokio::time::timeout(limit, self.recv_reply(query))
                .await
                .map_err(|_| NetworkError::UpstreamTimeout(limit))?,
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::RwLock;

    /// Mock upstream for testing.
    ///
    /// Records every forwarded query. Replies with the configured bytes, or
    /// echoes the query with the QR bit set when none are configured.
    #[derive(Clone, Default)]
    pub struct MockUpstream {
        /// Raw reply returned for every query.
        pub reply: Arc<RwLock<Option<Vec<u8>>>>,
        /// Queries received, in order.
        pub queries: Arc<RwLock<Vec<Vec<u8>>>>,
        /// Count of exchange calls.
        pub exchange_count: Arc<AtomicU64>,
        /// If set, exchange will return this error.
        pub error: Arc<RwLock<Option<String>>>,
    }

    impl MockUpstream {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn set_reply(&self, reply: Vec<u8>) {
            *self.reply.write().await = Some(reply);
        }

        pub async fn set_error(&self, error: &str) {
            *self.error.write().await = Some(error.to_string());
        }

        pub fn exchange_count(&self) -> u64 {
            self.exchange_count.load(Ordering::SeqCst)
        }

        pub async fn queries(&self) -> Vec<Vec<u8>> {
            self.queries.read().await.clone()
        }
    }

    impl Upstream for MockUpstream {
        async fn exchange(&self, query: &[u8]) -> Result<Vec<u8>> {
            self.exchange_count.fetch_add(1, Ordering::SeqCst);
            self.queries.write().await.push(query.to_vec());

            if let Some(error) = self.error.read().await.as_ref() {
                return Err(Error::Io(std::io::Error::other(error.clone())));
            }
            if let Some(reply) = self.reply.read().await.as_ref() {
                return Ok(reply.clone());
            }

            let mut echo = query.to_vec();
            if let Some(flags) = echo.get_mut(2) {
                *flags |= 0x80;
            }
            Ok(echo)
        }
    }

    async fn fake_resolver() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    #[tokio::test]
    async fn should_relay_reply_bytes_unmodified() {
        let resolver = fake_resolver().await;
        let upstream = UdpUpstream::connect(resolver.local_addr().unwrap(), None)
            .await
            .unwrap();
        let query = vec![0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];

        let server = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, peer) = resolver.recv_from(&mut buf).await.unwrap();
            let mut reply = buf[..len].to_vec();
            reply[2] = 0x81;
            reply.extend_from_slice(&[0xde, 0xad]);
            resolver.send_to(&reply, peer).await.unwrap();
            buf[..len].to_vec()
        });

        let reply = upstream.exchange(&query).await.unwrap();

        assert_eq!(server.await.unwrap(), query);
        assert_eq!(
            reply,
            vec![0x12, 0x34, 0x81, 0x00, 0, 1, 0, 0, 0, 0, 0, 0, 0xde, 0xad]
        );
    }

    #[tokio::test]
    async fn should_skip_replies_with_stale_ids() {
        let resolver = fake_resolver().await;
        let upstream = UdpUpstream::connect(resolver.local_addr().unwrap(), None)
            .await
            .unwrap();
        let query = vec![0x00, 0x02, 0x01, 0x00, 0, 0, 0, 0, 0, 0, 0, 0];

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, peer) = resolver.recv_from(&mut buf).await.unwrap();
            resolver.send_to(&[0x00, 0x01, 0x81, 0x00], peer).await.unwrap();
            resolver.send_to(&[0x00, 0x02, 0x81, 0x00], peer).await.unwrap();
        });

        let reply = upstream.exchange(&query).await.unwrap();

        assert_eq!(reply, vec![0x00, 0x02, 0x81, 0x00]);
    }

    #[tokio::test]
    async fn should_time_out_when_configured() {
        let resolver = fake_resolver().await;
        let limit = Duration::from_millis(50);
        let upstream = UdpUpstream::connect(resolver.local_addr().unwrap(), Some(limit))
            .await
            .unwrap();

        let result = upstream.exchange(&[0, 1, 1, 0]).await;

        assert!(matches!(
            result,
            Err(Error::Network(NetworkError::UpstreamTimeout(d))) if d == limit
        ));
        drop(resolver);
    }

    #[tokio::test]
    async fn should_echo_query_from_mock() {
        let upstream = MockUpstream::new();

        let reply = upstream.exchange(&[0, 7, 0x01, 0x00]).await.unwrap();

        assert_eq!(reply, vec![0, 7, 0x81, 0x00]);
        assert_eq!(upstream.exchange_count(), 1);
        assert_eq!(upstream.queries().await, vec![vec![0, 7, 0x01, 0x00]]);
    }

    #[tokio::test]
    async fn should_return_error_when_mock_configured_to_fail() {
        let upstream = MockUpstream::new();
        upstream.set_error("connection refused").await;

        assert!(upstream.exchange(&[0, 1]).await.is_err());
    }
}
