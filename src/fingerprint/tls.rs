//! TLS Client Hello specification (JA3/JA4 shape).
//!
//! A [`ClientHelloSpec`] is an ordered description of what a browser puts in
//! its Client Hello. Order is part of the fingerprint, so every derived spec
//! keeps the extension sequence of the spec it came from.

use std::fmt::Write as _;

/// Placeholder GREASE value (RFC 8701). The engine substitutes a random
/// GREASE codepoint per connection.
pub const GREASE_PLACEHOLDER: u16 = 0x0a0a;

pub const ALPN_H2: &str = "h2";
pub const ALPN_HTTP1: &str = "http/1.1";

/// Legacy record version reported in JA3 for TLS 1.2+ Client Hellos.
const JA3_LEGACY_VERSION: u16 = 771;

/// True for RFC 8701 GREASE codepoints (0x0a0a, 0x1a1a, ... 0xfafa).
pub fn is_grease(value: u16) -> bool {
    (value & 0x0f0f) == 0x0a0a && (value >> 8) == (value & 0xff)
}

/// Certificate compression algorithms (RFC 8879).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertCompression {
    Zlib,
    Brotli,
    Zstd,
}

impl CertCompression {
    pub fn id(self) -> u16 {
        match self {
            CertCompression::Zlib => 1,
            CertCompression::Brotli => 2,
            CertCompression::Zstd => 3,
        }
    }
}

/// One Client Hello extension with its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsExtension {
    /// GREASE extension; the engine picks the codepoint.
    Grease,
    /// server_name (0); the host name comes from the connection.
    ServerName,
    /// status_request (5), OCSP stapling.
    StatusRequest,
    /// supported_groups (10).
    SupportedGroups(Vec<u16>),
    /// ec_point_formats (11).
    EcPointFormats(Vec<u8>),
    /// signature_algorithms (13).
    SignatureAlgorithms(Vec<u16>),
    /// application_layer_protocol_negotiation (16).
    Alpn(Vec<String>),
    /// signed_certificate_timestamp (18).
    SignedCertificateTimestamp,
    /// padding (21).
    Padding,
    /// extended_master_secret (23).
    ExtendedMasterSecret,
    /// compress_certificate (27).
    CompressCertificate(Vec<CertCompression>),
    /// session_ticket (35).
    SessionTicket,
    /// supported_versions (43).
    SupportedVersions(Vec<u16>),
    /// psk_key_exchange_modes (45).
    PskKeyExchangeModes(Vec<u8>),
    /// key_share (51), groups that carry a share.
    KeyShare(Vec<u16>),
    /// application_settings (ALPS), old (17513) or new (17613) codepoint.
    ApplicationSettings { codepoint: u16, protocols: Vec<String> },
    /// encrypted_client_hello (65037) sent as GREASE.
    EchGrease,
    /// renegotiation_info (65281).
    RenegotiationInfo,
    /// Any other extension, carried verbatim.
    Unknown { id: u16, data: Vec<u8> },
}

impl TlsExtension {
    pub const ALPS_OLD_CODEPOINT: u16 = 17513;
    pub const ALPS_NEW_CODEPOINT: u16 = 17613;

    /// IANA extension type.
    pub fn id(&self) -> u16 {
        match self {
            TlsExtension::Grease => GREASE_PLACEHOLDER,
            TlsExtension::ServerName => 0,
            TlsExtension::StatusRequest => 5,
            TlsExtension::SupportedGroups(_) => 10,
            TlsExtension::EcPointFormats(_) => 11,
            TlsExtension::SignatureAlgorithms(_) => 13,
            TlsExtension::Alpn(_) => 16,
            TlsExtension::SignedCertificateTimestamp => 18,
            TlsExtension::Padding => 21,
            TlsExtension::ExtendedMasterSecret => 23,
            TlsExtension::CompressCertificate(_) => 27,
            TlsExtension::SessionTicket => 35,
            TlsExtension::SupportedVersions(_) => 43,
            TlsExtension::PskKeyExchangeModes(_) => 45,
            TlsExtension::KeyShare(_) => 51,
            TlsExtension::ApplicationSettings { codepoint, .. } => *codepoint,
            TlsExtension::EchGrease => 65037,
            TlsExtension::RenegotiationInfo => 65281,
            TlsExtension::Unknown { id, .. } => *id,
        }
    }

    pub fn is_grease(&self) -> bool {
        match self {
            TlsExtension::Grease => true,
            TlsExtension::Unknown { id, .. } => is_grease(*id),
            _ => false,
        }
    }
}

/// Ordered Client Hello shape of a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloSpec {
    /// Cipher suites in order; GREASE placeholders allowed.
    pub cipher_suites: Vec<u16>,
    /// Compression methods (always `[0]` for modern browsers).
    pub compression_methods: Vec<u8>,
    /// Extensions in the order they define the fingerprint.
    pub extensions: Vec<TlsExtension>,
    /// Let the engine permute extension order per connection
    /// (Chrome 110+ behavior).
    pub permute_extensions: bool,
}

impl ClientHelloSpec {
    /// Extension types in order.
    pub fn extension_ids(&self) -> Vec<u16> {
        self.extensions.iter().map(TlsExtension::id).collect()
    }

    /// True if any cipher, group, version or extension is GREASE.
    pub fn uses_grease(&self) -> bool {
        self.cipher_suites.iter().any(|&c| is_grease(c))
            || self.extensions.iter().any(|ext| match ext {
                TlsExtension::SupportedGroups(groups) | TlsExtension::KeyShare(groups) => {
                    groups.iter().any(|&g| is_grease(g))
                }
                TlsExtension::SupportedVersions(versions) => versions.iter().any(|&v| is_grease(v)),
                other => other.is_grease(),
            })
    }

    /// ALPN protocols of the first ALPN extension.
    pub fn alpn_protocols(&self) -> Option<&[String]> {
        self.extensions.iter().find_map(|ext| match ext {
            TlsExtension::Alpn(protos) => Some(protos.as_slice()),
            _ => None,
        })
    }

    pub fn extension(&self, id: u16) -> Option<&TlsExtension> {
        self.extensions.iter().find(|ext| ext.id() == id)
    }

    pub fn has_extension(&self, id: u16) -> bool {
        self.extension(id).is_some()
    }

    /// Derived copy whose ALPN extensions all list exactly `protocols`.
    ///
    /// Extension order and every other extension are left untouched.
    pub fn with_alpn(&self, protocols: &[&str]) -> Self {
        let mut spec = self.clone();
        for ext in &mut spec.extensions {
            if let TlsExtension::Alpn(protos) = ext {
                *protos = protocols.iter().map(|p| p.to_string()).collect();
            }
        }
        spec
    }

    /// Derived copy that only offers HTTP/1.1 over ALPN.
    pub fn force_http1(&self) -> Self {
        self.with_alpn(&[ALPN_HTTP1])
    }

    /// JA3 string: `version,ciphers,extensions,groups,point_formats` with
    /// GREASE values removed.
    pub fn ja3(&self) -> String {
        let join = |values: &mut dyn Iterator<Item = u16>| {
            let mut out = String::new();
            for (i, v) in values.enumerate() {
                if i > 0 {
                    out.push('-');
                }
                let _ = write!(out, "{}", v);
            }
            out
        };

        let ciphers = join(&mut self.cipher_suites.iter().copied().filter(|&c| !is_grease(c)));
        let extensions = join(
            &mut self
                .extensions
                .iter()
                .filter(|ext| !ext.is_grease())
                .map(TlsExtension::id),
        );
        let groups = match self.extension(10) {
            Some(TlsExtension::SupportedGroups(groups)) => {
                join(&mut groups.iter().copied().filter(|&g| !is_grease(g)))
            }
            _ => String::new(),
        };
        let points = match self.extension(11) {
            Some(TlsExtension::EcPointFormats(points)) => {
                join(&mut points.iter().map(|&p| u16::from(p)))
            }
            _ => String::new(),
        };

        format!(
            "{},{},{},{},{}",
            JA3_LEGACY_VERSION, ciphers, extensions, groups, points
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ClientHelloSpec {
        ClientHelloSpec {
            cipher_suites: vec![GREASE_PLACEHOLDER, 0x1301, 0xc02b],
            compression_methods: vec![0],
            extensions: vec![
                TlsExtension::Grease,
                TlsExtension::ServerName,
                TlsExtension::SupportedGroups(vec![GREASE_PLACEHOLDER, 0x001d, 0x0017]),
                TlsExtension::EcPointFormats(vec![0]),
                TlsExtension::Alpn(vec![ALPN_H2.into(), ALPN_HTTP1.into()]),
                TlsExtension::SignatureAlgorithms(vec![0x0403, 0x0804]),
                TlsExtension::ApplicationSettings {
                    codepoint: TlsExtension::ALPS_OLD_CODEPOINT,
                    protocols: vec![ALPN_H2.into()],
                },
                TlsExtension::Grease,
            ],
            permute_extensions: false,
        }
    }

    #[test]
    fn test_grease_detection() {
        for v in [0x0a0a, 0x1a1a, 0x2a2a, 0xfafa] {
            assert!(is_grease(v), "{v:#06x}");
        }
        for v in [0x0a1a, 0x1301, 0x001d, 0x0000] {
            assert!(!is_grease(v), "{v:#06x}");
        }
    }

    #[test]
    fn test_force_http1_rewrites_only_alpn() {
        let original = sample();
        let forced = original.force_http1();

        assert_eq!(forced.alpn_protocols(), Some(&[ALPN_HTTP1.to_string()][..]));
        assert_eq!(forced.extension_ids(), original.extension_ids());
        for (a, b) in original.extensions.iter().zip(&forced.extensions) {
            if !matches!(a, TlsExtension::Alpn(_)) {
                assert_eq!(a, b);
            }
        }
        // ALPS keeps advertising h2 settings; only ALPN is forced.
        assert!(forced.has_extension(TlsExtension::ALPS_OLD_CODEPOINT));
        assert_eq!(forced.cipher_suites, original.cipher_suites);
        // Source spec is not aliased.
        assert_eq!(original.alpn_protocols().map(|p| p.len()), Some(2));
    }

    #[test]
    fn test_force_http1_rewrites_every_alpn_extension() {
        let mut spec = sample();
        spec.extensions.push(TlsExtension::Alpn(vec![ALPN_H2.into()]));
        let forced = spec.force_http1();
        let alpns: Vec<_> = forced
            .extensions
            .iter()
            .filter_map(|e| match e {
                TlsExtension::Alpn(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(alpns, vec![vec![ALPN_HTTP1.to_string()]; 2]);
    }

    #[test]
    fn test_ja3_skips_grease() {
        assert_eq!(sample().ja3(), "771,4865-49195,0-10-11-16-13-17513,29-23,0");
    }

    #[test]
    fn test_uses_grease() {
        assert!(sample().uses_grease());
        let plain = ClientHelloSpec {
            cipher_suites: vec![0x1301],
            compression_methods: vec![0],
            extensions: vec![TlsExtension::ServerName],
            permute_extensions: false,
        };
        assert!(!plain.uses_grease());
    }
}
