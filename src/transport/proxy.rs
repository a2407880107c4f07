//! HTTP CONNECT tunnel dialer.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::context::DialContext;
use crate::error::{BoxError, DialError};
use crate::transport::dialer::{BoxedConn, DialConfig, ProxyDialer};

/// Upper bound on the proxy's response head.
const MAX_RESPONSE_HEAD: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("proxy responded {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("malformed proxy response: {0:?}")]
    Malformed(String),

    #[error("proxy response head exceeds {} bytes", MAX_RESPONSE_HEAD)]
    HeadTooLarge,

    #[error("proxy closed the connection during CONNECT")]
    UnexpectedEof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Tunnels through an HTTP proxy with `CONNECT`.
#[derive(Debug, Clone)]
pub struct HttpConnectProxy {
    proxy_addr: String,
    credentials: Option<String>,
    dial: DialConfig,
}

impl HttpConnectProxy {
    /// Proxy listening at `proxy_addr` (`host:port`).
    pub fn new(proxy_addr: impl Into<String>) -> Self {
        Self {
            proxy_addr: proxy_addr.into(),
            credentials: None,
            dial: DialConfig::default(),
        }
    }

    /// Send `Proxy-Authorization: Basic` with these credentials.
    pub fn basic_auth(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(STANDARD.encode(format!("{username}:{password}")));
        self
    }

    /// Dialer used to reach the proxy itself.
    pub fn dial_config(mut self, dial: DialConfig) -> Self {
        self.dial = dial;
        self
    }

    fn connect_request(&self, user_agent: &str, addr: &str) -> String {
        let mut request = format!("CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\n");
        if !user_agent.is_empty() {
            request.push_str(&format!("User-Agent: {user_agent}\r\n"));
        }
        if let Some(credentials) = &self.credentials {
            request.push_str(&format!("Proxy-Authorization: Basic {credentials}\r\n"));
        }
        request.push_str("\r\n");
        request
    }
}

#[async_trait]
impl ProxyDialer for HttpConnectProxy {
    async fn dial_context(
        &self,
        cx: &DialContext,
        user_agent: &str,
        network: &str,
        addr: &str,
    ) -> Result<BoxedConn, BoxError> {
        let mut stream = self.dial.dial(cx, network, &self.proxy_addr).await?;
        tracing::debug!(proxy = %self.proxy_addr, target = addr, "sending CONNECT");

        let request = self.connect_request(user_agent, addr);
        cx.run(tunnel(&mut stream, request.as_bytes()))
            .await
            .map_err(DialError::from)??;
        Ok(Box::new(stream))
    }
}

async fn tunnel(stream: &mut TcpStream, request: &[u8]) -> Result<(), TunnelError> {
    stream.write_all(request).await?;
    let head = read_response_head(stream).await?;
    parse_status(&head)
}

/// Consume the response head and nothing past it, so tunneled bytes that
/// arrive with the head stay in the socket.
async fn read_response_head(stream: &mut TcpStream) -> Result<Vec<u8>, TunnelError> {
    let mut head = Vec::with_capacity(256);
    let mut chunk = [0u8; 1024];
    loop {
        let room = (MAX_RESPONSE_HEAD - head.len()).min(chunk.len());
        if room == 0 {
            return Err(TunnelError::HeadTooLarge);
        }
        let peeked = stream.peek(&mut chunk[..room]).await?;
        if peeked == 0 {
            return Err(TunnelError::UnexpectedEof);
        }

        let prior = head.len();
        head.extend_from_slice(&chunk[..peeked]);
        // The terminator may straddle the previous chunk.
        let from = prior.saturating_sub(3);
        let end = head[from..]
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|pos| from + pos + 4);

        let take = end.map_or(peeked, |end| end - prior);
        stream.read_exact(&mut chunk[..take]).await?;
        if let Some(end) = end {
            head.truncate(end);
            return Ok(head);
        }
    }
}

fn parse_status(head: &[u8]) -> Result<(), TunnelError> {
    let text = String::from_utf8_lossy(head);
    let line = text.lines().next().unwrap_or_default();
    let malformed = || TunnelError::Malformed(line.to_string());

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or_else(malformed)?;
    if !version.starts_with("HTTP/1.") {
        return Err(malformed());
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(malformed)?;
    let reason = parts.next().unwrap_or_default().to_string();

    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(TunnelError::Status { status, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_status() {
        assert!(parse_status(b"HTTP/1.1 200 Connection established\r\n\r\n").is_ok());
        assert!(parse_status(b"HTTP/1.0 204 No Content\r\n\r\n").is_ok());
        assert!(matches!(
            parse_status(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n"),
            Err(TunnelError::Status { status: 407, .. })
        ));
        assert!(matches!(
            parse_status(b"SSH-2.0-OpenSSH\r\n\r\n"),
            Err(TunnelError::Malformed(_))
        ));
    }

    #[test]
    fn test_connect_request_headers() {
        let proxy = HttpConnectProxy::new("proxy:3128").basic_auth("user", "pass");
        let request = proxy.connect_request("ua/1.0", "example.com:443");
        assert_eq!(
            request,
            "CONNECT example.com:443 HTTP/1.1\r\n\
             Host: example.com:443\r\n\
             User-Agent: ua/1.0\r\n\
             Proxy-Authorization: Basic dXNlcjpwYXNz\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_tunnel_leaves_payload_unread() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            assert!(buf[..n].starts_with(b"CONNECT example.com:443 HTTP/1.1\r\n"));
            sock.write_all(b"HTTP/1.1 200 OK\r\n\r\npayload")
                .await
                .unwrap();
        });

        let mut conn = HttpConnectProxy::new(proxy_addr)
            .dial_context(&DialContext::background(), "ua", "tcp", "example.com:443")
            .await
            .unwrap();
        let mut payload = [0u8; 7];
        conn.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"payload");
    }

    #[tokio::test]
    async fn test_head_split_across_segments() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 200 OK\r\n\r").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            sock.write_all(b"\npayload").await.unwrap();
        });

        let mut conn = HttpConnectProxy::new(proxy_addr)
            .dial_context(&DialContext::background(), "ua", "tcp", "example.com:443")
            .await
            .unwrap();
        let mut payload = [0u8; 7];
        conn.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"payload");
    }

    #[tokio::test]
    async fn test_oversized_head_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            let mut head = b"HTTP/1.1 200 OK\r\nX-Filler: ".to_vec();
            head.resize(MAX_RESPONSE_HEAD + 64, b'a');
            let _ = sock.write_all(&head).await;
            let _ = sock.read(&mut buf).await;
        });

        let err = HttpConnectProxy::new(proxy_addr)
            .dial_context(&DialContext::background(), "ua", "tcp", "example.com:443")
            .await
            .unwrap_err();
        let tunnel = err.downcast_ref::<TunnelError>().unwrap();
        assert!(matches!(tunnel, TunnelError::HeadTooLarge));
    }

    #[tokio::test]
    async fn test_tunnel_rejected_by_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await.unwrap();
        });

        let err = HttpConnectProxy::new(proxy_addr)
            .dial_context(&DialContext::background(), "ua", "tcp", "example.com:443")
            .await
            .unwrap_err();
        let tunnel = err.downcast_ref::<TunnelError>().unwrap();
        assert!(matches!(tunnel, TunnelError::Status { status: 403, .. }));
    }
}
