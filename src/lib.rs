//! # Mimicry
//!
//! TLS connection establishment that looks like a browser.
//!
//! A [`Session`] dials `host:port` (directly or through a [`ProxyDialer`]),
//! presents the Client Hello of a chosen [`FingerprintProfile`] through
//! BoringSSL, and verifies the server's certificate chain with standard
//! X.509 rules plus an optional per-address pin set.
//!
//! ```no_run
//! use mimicry::{ConnectOptions, DialContext, Session};
//!
//! # async fn run() -> mimicry::Result<()> {
//! let session = Session::builder().build()?;
//! let stream = session
//!     .establish_tls(
//!         &DialContext::background(),
//!         "tcp",
//!         "example.com:443",
//!         &ConnectOptions::new(),
//!     )
//!     .await?;
//! println!("negotiated {:?}", stream.alpn_protocol());
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod fingerprint;
pub mod pin;
pub mod session;
pub mod transport;
pub mod verify;

// Re-exports
pub use context::{ConnectOptions, DialContext};
pub use error::{Error, Result, Stage};
pub use fingerprint::{ClientHelloSource, ClientHelloSpec, FingerprintProfile, TlsExtension};
pub use pin::{PinManager, PinRegistry};
pub use session::{Session, SessionBuilder};
pub use transport::{
    AlpnProtocol, BoxedConn, DialConfig, HttpConnectProxy, ProxyDialer, TcpFingerprint, TlsStream,
};
pub use verify::PeerCertificate;
