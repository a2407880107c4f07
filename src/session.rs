//! Connection pipeline: dial, pin pre-check, fingerprinted TLS upgrade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::{ConnectOptions, DialContext};
use crate::error::{BoxError, DialError, Error, PinError, Result};
use crate::fingerprint::tls::ALPN_HTTP1;
use crate::fingerprint::{ClientHelloSource, ClientHelloSpec, FingerprintProfile};
use crate::pin::{PinManager, PinRegistry};
use crate::transport::addr::split_host_port;
use crate::transport::connector::{TlsConnector, TlsStream, UpgradeConfig};
use crate::transport::dialer::{BoxedConn, DialConfig, ModifyDialer, ProxyDialer};
use crate::transport::tcp::TcpFingerprint;

/// Client-wide connection settings shared by every attempt.
///
/// Cloning is cheap and shares configuration and pin state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    timeout: Option<Duration>,
    user_agent: String,
    insecure_skip_verify: AtomicBool,
    proxy_dialer: Option<Arc<dyn ProxyDialer>>,
    modify_dialer: Option<ModifyDialer>,
    fingerprint: Arc<dyn ClientHelloSource>,
    connector: TlsConnector,
    tcp_fingerprint: Option<TcpFingerprint>,
    auto_pin: bool,
    pins: Arc<PinRegistry>,
}

impl Session {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Dial `addr` and upgrade the connection to TLS.
    pub async fn establish_tls(
        &self,
        cx: &DialContext,
        network: &str,
        addr: &str,
        opts: &ConnectOptions,
    ) -> Result<TlsStream> {
        let conn = self.dial(cx, network, addr, opts).await.map_err(Error::Dial)?;
        self.upgrade_tls(cx, conn, addr, opts).await
    }

    /// Open a raw connection to `addr`, through the proxy dialer if one is
    /// configured.
    pub async fn dial(
        &self,
        cx: &DialContext,
        network: &str,
        addr: &str,
        opts: &ConnectOptions,
    ) -> std::result::Result<BoxedConn, DialError> {
        let inner = &self.inner;

        if let Some(proxy) = &inner.proxy_dialer {
            let user_agent = opts.user_agent.as_deref().unwrap_or(&inner.user_agent);
            tracing::debug!(network, addr, "dialing through proxy dialer");
            return cx
                .run(proxy.dial_context(cx, user_agent, network, addr))
                .await?
                .map_err(DialError::Proxy);
        }

        let mut config = DialConfig {
            timeout: inner.timeout,
            tcp_fingerprint: inner.tcp_fingerprint.clone(),
            ..DialConfig::default()
        };
        if let Some(hook) = &inner.modify_dialer {
            hook(&mut config).map_err(DialError::Hook)?;
        }

        tracing::debug!(network, addr, timeout = ?config.timeout, "dialing");
        let stream = config.dial(cx, network, addr).await?;
        Ok(Box::new(stream))
    }

    /// Run the TLS handshake for `addr` over an already open connection.
    ///
    /// `conn` is closed on every failure.
    pub async fn upgrade_tls(
        &self,
        cx: &DialContext,
        conn: BoxedConn,
        addr: &str,
        opts: &ConnectOptions,
    ) -> Result<TlsStream> {
        let (host, _) = split_host_port(addr).map_err(Error::Address)?;
        let insecure = self.insecure_skip_verify();

        if !insecure {
            self.pin_precheck(addr).map_err(Error::Pin)?;
        }

        let spec = self.client_hello(opts);
        let next_protos = if opts.force_http1 {
            vec![ALPN_HTTP1.to_string()]
        } else {
            spec.alpn_protocols().map(<[String]>::to_vec).unwrap_or_default()
        };
        let config = UpgradeConfig {
            server_name: host.to_string(),
            address: addr.to_string(),
            insecure_skip_verify: insecure,
            next_protos,
            auto_pin: self.inner.auto_pin,
        };

        self.inner
            .connector
            .handshake(cx, conn, &config, &spec, Some(self.inner.pins.clone()))
            .await
    }

    fn client_hello(&self, opts: &ConnectOptions) -> ClientHelloSpec {
        let spec = self.inner.fingerprint.client_hello_spec();
        if opts.force_http1 {
            spec.force_http1()
        } else {
            spec
        }
    }

    fn pin_precheck(&self, addr: &str) -> std::result::Result<(), PinError> {
        tracing::debug!(addr, pinned = self.inner.pins.contains(addr), "pin pre-check");
        self.inner.pins.precheck(addr)
    }

    /// Add `pin-sha256` values for `addr`, creating its pin set if needed.
    pub fn add_pins<I, S>(&self, addr: &str, pins: I) -> std::result::Result<(), PinError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.pins.add_pins(addr, pins)
    }

    /// Replace the pin set for `addr`.
    pub fn set_pin_manager(&self, addr: impl Into<String>, manager: PinManager) {
        self.inner.pins.insert(addr, manager);
    }

    /// Stop pinning `addr`.
    pub fn clear_pins(&self, addr: &str) -> Option<Arc<PinManager>> {
        self.inner.pins.remove(addr)
    }

    pub fn pin_manager(&self, addr: &str) -> Option<Arc<PinManager>> {
        self.inner.pins.get(addr)
    }

    /// Enable or disable certificate verification for later attempts.
    pub fn set_insecure_skip_verify(&self, insecure: bool) {
        self.inner
            .insecure_skip_verify
            .store(insecure, Ordering::Relaxed);
    }

    pub fn insecure_skip_verify(&self) -> bool {
        self.inner.insecure_skip_verify.load(Ordering::Relaxed)
    }

    /// User agent handed to the proxy dialer when no override is given.
    pub fn user_agent(&self) -> &str {
        &self.inner.user_agent
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("timeout", &self.inner.timeout)
            .field("user_agent", &self.inner.user_agent)
            .field("insecure_skip_verify", &self.insecure_skip_verify())
            .field("proxy_dialer", &self.inner.proxy_dialer.is_some())
            .field("auto_pin", &self.inner.auto_pin)
            .finish_non_exhaustive()
    }
}

/// Builder for creating sessions.
pub struct SessionBuilder {
    timeout: Option<Duration>,
    user_agent: Option<String>,
    insecure_skip_verify: bool,
    proxy_dialer: Option<Arc<dyn ProxyDialer>>,
    modify_dialer: Option<ModifyDialer>,
    fingerprint: Arc<dyn ClientHelloSource>,
    root_certs: Vec<Vec<u8>>,
    tcp_fingerprint: Option<TcpFingerprint>,
    auto_pin: bool,
}

impl SessionBuilder {
    /// Create a new session builder with default settings.
    pub fn new() -> Self {
        Self {
            timeout: None,
            user_agent: None,
            insecure_skip_verify: false,
            proxy_dialer: None,
            modify_dialer: None,
            fingerprint: Arc::new(FingerprintProfile::default()),
            root_certs: Vec::new(),
            tcp_fingerprint: None,
            auto_pin: false,
        }
    }

    /// Bound on each direct dial.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Default user agent. Falls back to the fingerprint's browser.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Disable all certificate verification.
    pub fn insecure_skip_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_verify = insecure;
        self
    }

    /// Delegate every dial to `dialer`.
    pub fn proxy_dialer(mut self, dialer: impl ProxyDialer + 'static) -> Self {
        self.proxy_dialer = Some(Arc::new(dialer));
        self
    }

    /// Hook run on the direct dialer configuration before each dial.
    pub fn modify_dialer<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut DialConfig) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.modify_dialer = Some(Arc::new(hook));
        self
    }

    /// Set the Client Hello source.
    pub fn fingerprint(mut self, source: impl ClientHelloSource + 'static) -> Self {
        self.fingerprint = Arc::new(source);
        self
    }

    /// Trust an extra root certificate (DER or PEM).
    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.root_certs.push(cert.into());
        self
    }

    pub fn tcp_fingerprint(mut self, fp: TcpFingerprint) -> Self {
        self.tcp_fingerprint = Some(fp);
        self
    }

    /// Pin the chain presented on first contact with an unpinned address,
    /// once it passes validity and hostname checks.
    pub fn auto_pin(mut self, enabled: bool) -> Self {
        self.auto_pin = enabled;
        self
    }

    /// Build the session.
    pub fn build(self) -> Result<Session> {
        let user_agent = self
            .user_agent
            .or_else(|| self.fingerprint.user_agent())
            .unwrap_or_default();
        if self.insecure_skip_verify {
            tracing::warn!("session created with certificate verification disabled");
        }
        let connector = TlsConnector::new()
            .with_root_certificates(&self.root_certs)
            .map_err(Error::Preset)?;

        Ok(Session {
            inner: Arc::new(SessionInner {
                timeout: self.timeout,
                user_agent,
                insecure_skip_verify: AtomicBool::new(self.insecure_skip_verify),
                proxy_dialer: self.proxy_dialer,
                modify_dialer: self.modify_dialer,
                fingerprint: self.fingerprint,
                connector,
                tcp_fingerprint: self.tcp_fingerprint,
                auto_pin: self.auto_pin,
                pins: Arc::new(PinRegistry::new()),
            }),
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
