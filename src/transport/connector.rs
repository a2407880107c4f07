//! BoringSSL TLS upgrader.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::SystemTime;

use boring::ssl::{SslConnector, SslMethod, SslVerifyMode};
use boring::x509::{X509StoreContextRef, X509};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_boring::SslStream;

use crate::context::DialContext;
use crate::error::{Error, HandshakeError, PresetError, VerifyError};
use crate::fingerprint::tls::{ClientHelloSpec, ALPN_H2, ALPN_HTTP1};
use crate::pin::{PinManager, PinRegistry};
use crate::transport::dialer::BoxedConn;
use crate::transport::preset::{apply_preset, ConnectionPreset};
use crate::verify::{CertVerifier, PeerCertificate};

/// Per-handshake TLS client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeConfig {
    /// Host name sent in SNI and matched against the leaf certificate.
    pub server_name: String,
    /// `host:port` the pin registry is keyed by.
    pub address: String,
    pub insecure_skip_verify: bool,
    /// Protocols the server may select through ALPN.
    pub next_protos: Vec<String>,
    /// Pin the verified chain when `address` has no pin set yet.
    pub auto_pin: bool,
}

/// Verification result recorded by the engine callback.
type VerifySlot = Arc<Mutex<Option<VerifyError>>>;

/// BoringSSL-based TLS connector.
#[derive(Clone, Default)]
pub struct TlsConnector {
    root_certs: Vec<X509>,
}

impl TlsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust these roots in addition to the system store. Each entry is DER
    /// or PEM.
    pub fn with_root_certificates(mut self, certs: &[Vec<u8>]) -> Result<Self, PresetError> {
        for bytes in certs {
            let cert = X509::from_der(bytes)
                .or_else(|_| X509::from_pem(bytes))
                .map_err(PresetError::engine("parse root certificate"))?;
            self.root_certs.push(cert);
        }
        Ok(self)
    }

    fn build_connector(
        &self,
        spec: &ClientHelloSpec,
    ) -> Result<(SslConnector, ConnectionPreset), PresetError> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(PresetError::engine("create SSL connector"))?;

        for cert in &self.root_certs {
            builder
                .cert_store_mut()
                .add_cert(cert.clone())
                .map_err(PresetError::engine("add root certificate"))?;
        }

        let preset = apply_preset(&mut builder, spec)?;
        Ok((builder.build(), preset))
    }

    /// Run the TLS handshake over `stream` with `spec` as Client Hello.
    ///
    /// `pins` is consulted from inside the verification callback; `None`
    /// disables pinning for this handshake. With `config.auto_pin` an
    /// unpinned address has its verified chain registered there. `stream` is dropped, and with
    /// it the raw connection, on every failure.
    pub async fn handshake(
        &self,
        cx: &DialContext,
        stream: BoxedConn,
        config: &UpgradeConfig,
        spec: &ClientHelloSpec,
        pins: Option<Arc<PinRegistry>>,
    ) -> Result<TlsStream, Error> {
        let (connector, preset) = self.build_connector(spec).map_err(Error::Preset)?;
        let mut ssl = connector
            .configure()
            .map_err(PresetError::engine("configure connection"))
            .map_err(Error::Preset)?;
        preset.apply(&mut ssl).map_err(Error::Preset)?;
        ssl.set_verify_hostname(false);

        let slot = VerifySlot::default();
        if config.insecure_skip_verify {
            tracing::warn!(addr = %config.address, "certificate verification disabled");
            ssl.set_verify(SslVerifyMode::NONE);
        } else {
            let verifier = VerifyCallback {
                hostname: config.server_name.clone(),
                address: config.address.clone(),
                pins,
                auto_pin: config.auto_pin,
                slot: slot.clone(),
            };
            ssl.set_verify_callback(SslVerifyMode::PEER, move |preverify_ok, store| {
                verifier.call(preverify_ok, store)
            });
        }

        let handshake = tokio_boring::connect(ssl, &config.server_name, stream);
        let stream = match cx.run(handshake).await {
            Ok(Ok(stream)) => TlsStream { inner: stream },
            Ok(Err(e)) => {
                let recorded = slot.lock().unwrap_or_else(|p| p.into_inner()).take();
                return Err(Error::Handshake(match recorded {
                    Some(verify) => HandshakeError::Verification(verify),
                    None => HandshakeError::Tls(e.to_string()),
                }));
            }
            Err(interrupt) => return Err(Error::Handshake(interrupt.into())),
        };

        if let Some(selected) = stream.inner.ssl().selected_alpn_protocol() {
            if !config.next_protos.iter().any(|p| p.as_bytes() == selected) {
                return Err(Error::Handshake(HandshakeError::AlpnMismatch {
                    selected: String::from_utf8_lossy(selected).into_owned(),
                    offered: config.next_protos.clone(),
                }));
            }
        }

        tracing::debug!(
            addr = %config.address,
            alpn = ?stream.alpn_protocol(),
            version = stream.version(),
            "handshake complete"
        );
        Ok(stream)
    }
}

/// State captured by the engine's certificate callback.
struct VerifyCallback {
    hostname: String,
    address: String,
    pins: Option<Arc<PinRegistry>>,
    auto_pin: bool,
    slot: VerifySlot,
}

impl VerifyCallback {
    /// Called once per chain depth, root first. Chain building and trust
    /// are left to the engine; the policy runs once the leaf is reached.
    fn call(&self, preverify_ok: bool, store: &mut X509StoreContextRef) -> bool {
        let now = SystemTime::now();
        let depth = store.error_depth();

        if !preverify_ok {
            let err = store
                .current_cert()
                .and_then(|cert| cert.to_der().ok())
                .and_then(|der| PeerCertificate::from_der(&der).ok())
                .and_then(|cert| cert.check_validity(now).err())
                .unwrap_or(VerifyError::Untrusted { depth });
            return self.reject(err);
        }
        if depth != 0 {
            return true;
        }

        let chain = match store.chain() {
            Some(stack) => stack
                .iter()
                .map(|cert| {
                    cert.to_der()
                        .map_err(|e| VerifyError::Malformed(e.to_string()))
                        .and_then(|der| PeerCertificate::from_der(&der))
                })
                .collect::<Result<Vec<_>, _>>(),
            None => Err(VerifyError::Untrusted { depth }),
        };
        let chain = match chain {
            Ok(chain) => chain,
            Err(e) => return self.reject(e),
        };

        let mut manager = self.pins.as_ref().and_then(|pins| pins.get(&self.address));
        if manager.is_none() && self.auto_pin {
            if let Some(pins) = &self.pins {
                match self.trust_on_first_use(pins, &chain, now) {
                    Ok(in_effect) => manager = Some(in_effect),
                    Err(e) => return self.reject(e),
                }
            }
        }

        match CertVerifier::new(&self.hostname, manager, false).verify(&[chain], now) {
            Ok(()) => true,
            Err(e) => self.reject(e),
        }
    }

    /// Register `chain` as the pin set for an unpinned address once it
    /// passes validity and hostname checks. A set registered concurrently by
    /// another attempt wins and is returned instead.
    fn trust_on_first_use(
        &self,
        pins: &PinRegistry,
        chain: &[PeerCertificate],
        now: SystemTime,
    ) -> Result<Arc<PinManager>, VerifyError> {
        CertVerifier::new(&self.hostname, None, false).verify(&[chain.to_vec()], now)?;
        let in_effect = pins.insert_if_absent(&self.address, PinManager::from_certificates(chain));
        tracing::debug!(addr = %self.address, pins = in_effect.len(), "pinned presented chain");
        Ok(in_effect)
    }

    fn reject(&self, err: VerifyError) -> bool {
        tracing::debug!(addr = %self.address, error = %err, "rejecting peer certificate");
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(err);
        false
    }
}

/// Negotiated ALPN protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpnProtocol {
    /// HTTP/2 ("h2")
    H2,
    /// HTTP/1.1 ("http/1.1")
    Http1,
    /// No ALPN negotiated or unknown protocol
    Unknown,
}

impl AlpnProtocol {
    /// Check if HTTP/2 was negotiated.
    pub fn is_h2(&self) -> bool {
        matches!(self, Self::H2)
    }

    /// Check if HTTP/1.1 was negotiated.
    pub fn is_http1(&self) -> bool {
        matches!(self, Self::Http1)
    }
}

/// Established TLS connection. Dropping it closes the raw connection.
#[derive(Debug)]
pub struct TlsStream {
    inner: SslStream<BoxedConn>,
}

impl TlsStream {
    /// Get the negotiated ALPN protocol.
    pub fn alpn_protocol(&self) -> AlpnProtocol {
        match self.inner.ssl().selected_alpn_protocol() {
            Some(p) if p == ALPN_H2.as_bytes() => AlpnProtocol::H2,
            Some(p) if p == ALPN_HTTP1.as_bytes() => AlpnProtocol::Http1,
            _ => AlpnProtocol::Unknown,
        }
    }

    /// Negotiated protocol version, e.g. `TLSv1.3`.
    pub fn version(&self) -> &'static str {
        self.inner.ssl().version_str()
    }

    /// Certificates presented by the server, leaf first.
    pub fn peer_certificates(&self) -> Vec<PeerCertificate> {
        let Some(chain) = self.inner.ssl().peer_cert_chain() else {
            return Vec::new();
        };
        chain
            .iter()
            .filter_map(|cert| cert.to_der().ok())
            .filter_map(|der| PeerCertificate::from_der(&der).ok())
            .collect()
    }

    pub fn get_ref(&self) -> &BoxedConn {
        self.inner.get_ref()
    }
}

impl AsyncRead for TlsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
