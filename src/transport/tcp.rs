//! TCP/IP stack fingerprinting.
//!
//! Socket buffer sizes and the initial hop limit are visible to passive
//! fingerprinters (p0f-style) before the first TLS byte. Window scaling,
//! SACK and timestamps are negotiated by the OS stack and cannot be set
//! through portable socket options, so they are not modeled.

use std::io;

/// TCP socket options applied before connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFingerprint {
    /// Receive buffer size; bounds the advertised initial window.
    pub recv_buffer_size: usize,
    /// Send buffer size.
    pub send_buffer_size: usize,
    /// IPv4 TTL / IPv6 unicast hop limit. macOS and Linux: 64, Windows: 128.
    pub ttl: u32,
    /// Disable Nagle's algorithm. Every major browser does.
    pub nodelay: bool,
}

impl Default for TcpFingerprint {
    fn default() -> Self {
        Self::macos()
    }
}

impl TcpFingerprint {
    /// Chrome or Safari on macOS.
    pub fn macos() -> Self {
        Self {
            recv_buffer_size: 131_072,
            send_buffer_size: 131_072,
            ttl: 64,
            nodelay: true,
        }
    }

    /// Chrome on Windows.
    pub fn windows() -> Self {
        Self {
            recv_buffer_size: 65_535,
            send_buffer_size: 65_535,
            ttl: 128,
            nodelay: true,
        }
    }

    /// Chrome on Linux.
    pub fn linux() -> Self {
        Self {
            recv_buffer_size: 131_072,
            send_buffer_size: 16_384,
            ttl: 64,
            nodelay: true,
        }
    }
}

/// Configure an unconnected TCP socket with fingerprint settings.
pub fn configure_tcp_socket(
    socket: &socket2::Socket,
    fp: &TcpFingerprint,
    ipv6: bool,
) -> io::Result<()> {
    socket.set_recv_buffer_size(fp.recv_buffer_size)?;
    socket.set_send_buffer_size(fp.send_buffer_size)?;
    if ipv6 {
        socket.set_unicast_hops_v6(fp.ttl)?;
    } else {
        socket.set_ttl(fp.ttl)?;
    }
    Ok(())
}
