//! Raw transport dialing.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpSocket, TcpStream};

use crate::context::DialContext;
use crate::error::{BoxError, DialError};
use crate::transport::tcp::{configure_tcp_socket, TcpFingerprint};

/// Keep-alive period of directly dialed connections.
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Duplex byte stream a TLS session can run over.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

/// Boxed raw connection.
pub type BoxedConn = Box<dyn Connection>;

/// Proxy-aware dialer supplied by the caller.
///
/// Receives the user agent resolved for this attempt so it can present it
/// to the proxy.
#[async_trait]
pub trait ProxyDialer: Send + Sync {
    async fn dial_context(
        &self,
        cx: &DialContext,
        user_agent: &str,
        network: &str,
        addr: &str,
    ) -> Result<BoxedConn, BoxError>;
}

/// Hook that may rewrite the direct dialer configuration before use.
/// An error aborts the dial before any connection is attempted.
pub type ModifyDialer = Arc<dyn Fn(&mut DialConfig) -> Result<(), BoxError> + Send + Sync>;

/// Direct TCP dialer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialConfig {
    /// Bound on resolution plus connect. `None` waits for the context.
    pub timeout: Option<Duration>,
    pub keep_alive: Duration,
    pub nodelay: bool,
    /// Local address to bind before connecting.
    pub local_address: Option<IpAddr>,
    pub tcp_fingerprint: Option<TcpFingerprint>,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            keep_alive: KEEP_ALIVE,
            nodelay: true,
            local_address: None,
            tcp_fingerprint: None,
        }
    }
}

impl DialConfig {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Connect to `addr` over `network` (`tcp`, `tcp4` or `tcp6`).
    ///
    /// Resolved addresses of the requested family are tried in order until
    /// one connects.
    pub async fn dial(
        &self,
        cx: &DialContext,
        network: &str,
        addr: &str,
    ) -> Result<TcpStream, DialError> {
        let want_v6 = match network {
            "tcp" => None,
            "tcp4" => Some(false),
            "tcp6" => Some(true),
            other => return Err(DialError::UnsupportedNetwork(other.to_string())),
        };

        let attempt = async {
            let targets: Vec<SocketAddr> = lookup_host(addr)
                .await
                .map_err(|source| DialError::Resolve {
                    addr: addr.to_string(),
                    source,
                })?
                .filter(|target| want_v6.map_or(true, |v6| target.is_ipv6() == v6))
                .collect();

            let mut last_err = None;
            for target in targets {
                match self.connect_one(target).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        tracing::debug!(%target, error = %e, "connect attempt failed");
                        last_err = Some(e);
                    }
                }
            }

            Err(match last_err {
                Some(source) => DialError::Connect {
                    addr: addr.to_string(),
                    source,
                },
                None => DialError::NoAddresses {
                    network: network.to_string(),
                    addr: addr.to_string(),
                },
            })
        };

        let bounded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(DialError::Timeout(limit)),
                },
                None => attempt.await,
            }
        };

        cx.run(bounded).await?
    }

    async fn connect_one(&self, target: SocketAddr) -> io::Result<TcpStream> {
        let socket = match target {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        if let Some(fp) = &self.tcp_fingerprint {
            configure_tcp_socket(&SockRef::from(&socket), fp, target.is_ipv6())?;
        }
        if let Some(local) = self.local_address {
            socket.bind(SocketAddr::new(local, 0))?;
        }

        let stream = socket.connect(target).await?;

        let nodelay = self
            .tcp_fingerprint
            .as_ref()
            .map_or(self.nodelay, |fp| fp.nodelay);
        stream.set_nodelay(nodelay)?;
        if !self.keep_alive.is_zero() {
            let keepalive = TcpKeepalive::new()
                .with_time(self.keep_alive)
                .with_interval(self.keep_alive);
            SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
        }
        Ok(stream)
    }
}
