//! Transport layer.
//!
//! - Direct TCP dialing with socket fingerprinting, or a caller proxy dialer
//! - HTTP CONNECT tunneling
//! - BoringSSL Client Hello presets and the TLS upgrade

pub mod addr;
pub mod connector;
pub mod dialer;
pub mod preset;
pub mod proxy;
pub mod tcp;

pub use connector::{AlpnProtocol, TlsConnector, TlsStream, UpgradeConfig};
pub use dialer::{BoxedConn, Connection, DialConfig, ModifyDialer, ProxyDialer, KEEP_ALIVE};
pub use proxy::HttpConnectProxy;
pub use tcp::TcpFingerprint;
