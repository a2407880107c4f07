//! Error types for mimicry crate.
//!
//! Every failure is labeled with the stage of the connection attempt that
//! produced it. Certificate rejections surface as the cause of a handshake
//! error so callers can tell a bad certificate from an unpinned one from a
//! network failure.

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use crate::context::Interrupt;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Opaque error returned by caller-supplied capabilities (proxy dialers,
/// dialer hooks, fingerprint sources).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stage of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dial,
    Split,
    Pin,
    Preset,
    Handshake,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Dial => "dial",
            Stage::Split => "split addr and port",
            Stage::Pin => "pin",
            Stage::Preset => "apply preset",
            Stage::Handshake => "handshake",
        })
    }
}

/// Errors returned by [`Session::establish_tls`](crate::Session::establish_tls)
/// and its stages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Raw transport connection could not be established.
    #[error("failed to dial: {0}")]
    Dial(#[source] DialError),

    /// Address could not be split into host and port.
    #[error("failed to split addr and port: {0}")]
    Address(#[source] AddressError),

    /// Pre-handshake pin check failed.
    #[error("failed to pin: {0}")]
    Pin(#[source] PinError),

    /// The fingerprint profile could not be applied to the TLS client.
    #[error("failed to apply preset: {0}")]
    Preset(#[source] PresetError),

    /// TLS handshake failed.
    #[error("failed to handshake: {0}")]
    Handshake(#[source] HandshakeError),
}

impl Error {
    /// Stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            Error::Dial(_) => Stage::Dial,
            Error::Address(_) => Stage::Split,
            Error::Pin(_) => Stage::Pin,
            Error::Preset(_) => Stage::Preset,
            Error::Handshake(_) => Stage::Handshake,
        }
    }

    /// True if the attempt was aborted by cancellation or a deadline.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Dial(DialError::Cancelled | DialError::DeadlineExceeded)
                | Error::Handshake(HandshakeError::Cancelled | HandshakeError::DeadlineExceeded)
        )
    }

    /// Certificate verification failure behind a handshake error, if any.
    pub fn verify_error(&self) -> Option<&VerifyError> {
        match self {
            Error::Handshake(HandshakeError::Verification(e)) => Some(e),
            _ => None,
        }
    }

    /// True if the peer certificate itself was rejected (validity window,
    /// hostname or trust), as opposed to a pin mismatch.
    pub fn is_certificate_error(&self) -> bool {
        self.verify_error()
            .is_some_and(|e| !matches!(e, VerifyError::PinMismatch))
    }

    /// True if the handshake was rejected because no certificate matched
    /// the registered pins.
    pub fn is_pin_mismatch(&self) -> bool {
        matches!(self.verify_error(), Some(VerifyError::PinMismatch))
    }
}

/// Transport dial failures.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("proxy dialer: {0}")]
    Proxy(#[source] BoxError),

    #[error("dialer hook: {0}")]
    Hook(#[source] BoxError),

    #[error("unsupported network {0:?}")]
    UnsupportedNetwork(String),

    #[error("lookup {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("no {network} addresses found for {addr}")]
    NoAddresses { network: String, addr: String },

    #[error("connect {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o timeout after {0:?}")]
    Timeout(Duration),

    #[error("operation was canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl From<Interrupt> for DialError {
    fn from(reason: Interrupt) -> Self {
        match reason {
            Interrupt::Cancelled => DialError::Cancelled,
            Interrupt::DeadlineExceeded => DialError::DeadlineExceeded,
        }
    }
}

/// Malformed `host:port` address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address {0}: missing port in address")]
    MissingPort(String),

    #[error("address {0}: too many colons in address")]
    TooManyColons(String),

    #[error("address {0}: missing ']' in address")]
    MissingBracket(String),

    #[error("address {0}: unexpected '[' in address")]
    UnexpectedBracket(String),

    #[error("address {0}: invalid port")]
    InvalidPort(String),

    #[error("address {0}: missing host")]
    MissingHost(String),
}

/// Pre-handshake pin check failures.
#[derive(Debug, thiserror::Error)]
pub enum PinError {
    #[error("pin set for {0} is empty")]
    EmptyPinSet(String),

    #[error("invalid pin {0:?}: expected base64 sha256 digest")]
    InvalidPin(String),
}

/// Fingerprint profile application failures.
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("unsupported cipher suite {0:#06x}")]
    UnsupportedCipher(u16),

    #[error("unsupported group {0:#06x}")]
    UnsupportedGroup(u16),

    #[error("unsupported signature algorithm {0:#06x}")]
    UnsupportedSignatureAlgorithm(u16),

    #[error("unsupported TLS version {0:#06x}")]
    UnsupportedVersion(u16),

    #[error("unsupported extension {0}")]
    UnsupportedExtension(u16),

    /// Extension declared where the engine's fixed emission order cannot
    /// place it.
    #[error("extension {0} cannot be sent at its declared position")]
    UnsupportedExtensionOrder(u16),

    #[error("unsupported certificate compression algorithm {0}")]
    UnsupportedCompression(u16),

    #[error("invalid ALPN protocol list: {0}")]
    InvalidAlpn(String),

    #[error("{context}: {source}")]
    Engine {
        context: &'static str,
        #[source]
        source: boring::error::ErrorStack,
    },
}

impl PresetError {
    pub(crate) fn engine(context: &'static str) -> impl FnOnce(boring::error::ErrorStack) -> Self {
        move |source| PresetError::Engine { context, source }
    }
}

/// TLS handshake failures.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The certificate verification callback rejected the peer.
    #[error(transparent)]
    Verification(VerifyError),

    #[error("server selected ALPN protocol {selected:?}, offered {offered:?}")]
    AlpnMismatch {
        selected: String,
        offered: Vec<String>,
    },

    #[error("{0}")]
    Tls(String),

    #[error("operation was canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl From<Interrupt> for HandshakeError {
    fn from(reason: Interrupt) -> Self {
        match reason {
            Interrupt::Cancelled => HandshakeError::Cancelled,
            Interrupt::DeadlineExceeded => HandshakeError::DeadlineExceeded,
        }
    }
}

/// Certificate verification failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("certificate is not valid yet: {subject}")]
    NotYetValid { subject: String },

    #[error("certificate is expired: {subject}")]
    Expired { subject: String },

    #[error(transparent)]
    Hostname(HostnameMismatch),

    #[error("pin verification failed")]
    PinMismatch,

    #[error("certificate chain is not trusted (depth {depth})")]
    Untrusted { depth: u32 },

    #[error("malformed certificate: {0}")]
    Malformed(String),
}

impl VerifyError {
    /// True for validity-window failures.
    pub fn is_validity(&self) -> bool {
        matches!(
            self,
            VerifyError::NotYetValid { .. } | VerifyError::Expired { .. }
        )
    }
}

/// Leaf certificate is not valid for the requested host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostnameMismatch {
    #[error("certificate is valid for {names}, not {host}")]
    Name { host: String, names: String },

    #[error("certificate is not valid for any names, but wanted to match {0}")]
    NoNames(String),

    #[error("cannot validate certificate for {0} because it doesn't contain any IP SANs")]
    NoIpSans(IpAddr),

    #[error("certificate is valid for {ips}, not {ip}")]
    Ip { ip: IpAddr, ips: String },
}
