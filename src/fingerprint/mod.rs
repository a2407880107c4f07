//! TLS Client Hello fingerprinting.

pub mod profiles;
pub mod tls;

pub use profiles::{ClientHelloSource, FingerprintProfile};
pub use tls::{CertCompression, ClientHelloSpec, TlsExtension};
