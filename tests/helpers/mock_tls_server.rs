use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use boring::ssl::{select_next_proto, AlpnError, SslAcceptorBuilder};
use mimicry::error::BoxError;
use mimicry::{BoxedConn, DialContext, ProxyDialer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Greeting written by the server after every completed handshake.
pub const GREETING: &[u8] = b"hello";

/// TLS server that records the ALPN list each client offered.
pub struct MockTlsServer {
    listener: TcpListener,
    addr: SocketAddr,
    offered_alpn: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockTlsServer {
    /// Create a new mock server bound to a random port.
    pub async fn bind() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        Ok(Self {
            listener,
            addr,
            offered_alpn: Arc::default(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wire-format ALPN lists offered so far, one per handshake.
    pub fn offered_alpn(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.offered_alpn.clone()
    }

    /// Start accepting in a background task. The server prefers h2.
    pub fn start(self, mut builder: SslAcceptorBuilder) -> tokio::task::JoinHandle<()> {
        let offered = self.offered_alpn.clone();
        builder.set_alpn_select_callback(move |_, client_protos| {
            offered.lock().unwrap().push(client_protos.to_vec());
            select_next_proto(b"\x02h2\x08http/1.1", client_protos).ok_or(AlpnError::NOACK)
        });
        let acceptor = Arc::new(builder.build());

        tokio::spawn(async move {
            loop {
                let (stream, _) = match self.listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        break;
                    }
                };
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match tokio_boring::accept(&acceptor, stream).await {
                        Ok(mut tls) => {
                            let _ = tls.write_all(GREETING).await;
                            let mut buf = [0u8; 64];
                            let _ = tls.read(&mut buf).await;
                        }
                        Err(e) => tracing::debug!("server handshake failed: {}", e),
                    }
                });
            }
        })
    }
}

/// Listener that accepts TCP connections and never answers.
pub async fn silent_listener() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (addr, handle)
}

/// Proxy dialer that sends every address to one local target and records
/// the user agents it was handed.
pub struct RedirectDialer {
    target: SocketAddr,
    pub user_agents: Arc<Mutex<Vec<String>>>,
}

impl RedirectDialer {
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            user_agents: Arc::default(),
        }
    }
}

#[async_trait]
impl ProxyDialer for RedirectDialer {
    async fn dial_context(
        &self,
        _cx: &DialContext,
        user_agent: &str,
        _network: &str,
        _addr: &str,
    ) -> Result<BoxedConn, BoxError> {
        self.user_agents.lock().unwrap().push(user_agent.to_string());
        let stream = TcpStream::connect(self.target).await?;
        Ok(Box::new(stream))
    }
}

/// Proxy dialer that hands out one end of an in-memory pipe relayed to
/// `target`, and reports each time a handed-out end is closed.
pub struct TappedDialer {
    target: SocketAddr,
    closed: mpsc::UnboundedSender<()>,
}

impl TappedDialer {
    pub fn new(target: SocketAddr) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (closed, rx) = mpsc::unbounded_channel();
        (Self { target, closed }, rx)
    }
}

#[async_trait]
impl ProxyDialer for TappedDialer {
    async fn dial_context(
        &self,
        _cx: &DialContext,
        _user_agent: &str,
        _network: &str,
        _addr: &str,
    ) -> Result<BoxedConn, BoxError> {
        let upstream = TcpStream::connect(self.target).await?;
        let (client, relay) = tokio::io::duplex(16 * 1024);
        let closed = self.closed.clone();

        tokio::spawn(async move {
            let (mut relay_rd, mut relay_wr) = tokio::io::split(relay);
            let (mut up_rd, mut up_wr) = upstream.into_split();
            let downstream = tokio::spawn(async move {
                let _ = tokio::io::copy(&mut up_rd, &mut relay_wr).await;
            });

            // Only EOF from the client end stops this loop; upstream write
            // errors are ignored.
            let mut buf = [0u8; 4096];
            loop {
                match relay_rd.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let _ = up_wr.write_all(&buf[..n]).await;
                    }
                }
            }
            let _ = closed.send(());
            downstream.abort();
        });

        Ok(Box::new(client))
    }
}
