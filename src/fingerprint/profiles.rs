//! Browser fingerprint profiles.

use super::tls::{
    CertCompression, ClientHelloSpec, TlsExtension, ALPN_H2, ALPN_HTTP1, GREASE_PLACEHOLDER,
};

/// Chrome 131 cipher suites in exact order.
pub const CHROME_131_CIPHER_SUITES: &[u16] = &[
    GREASE_PLACEHOLDER,
    0x1301, // TLS_AES_128_GCM_SHA256
    0x1302, // TLS_AES_256_GCM_SHA384
    0x1303, // TLS_CHACHA20_POLY1305_SHA256
    0xc02b, // TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
    0xc02f, // TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
    0xc02c, // TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384
    0xc030, // TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384
    0xcca9, // TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256
    0xcca8, // TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256
    0xc013, // TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
    0xc014, // TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA
    0x009c, // TLS_RSA_WITH_AES_128_GCM_SHA256
    0x009d, // TLS_RSA_WITH_AES_256_GCM_SHA384
    0x002f, // TLS_RSA_WITH_AES_128_CBC_SHA
    0x0035, // TLS_RSA_WITH_AES_256_CBC_SHA
];

/// Chrome 131 signature algorithms.
pub const CHROME_131_SIGNATURE_ALGORITHMS: &[u16] = &[
    0x0403, // ecdsa_secp256r1_sha256
    0x0804, // rsa_pss_rsae_sha256
    0x0401, // rsa_pkcs1_sha256
    0x0503, // ecdsa_secp384r1_sha384
    0x0805, // rsa_pss_rsae_sha384
    0x0501, // rsa_pkcs1_sha384
    0x0806, // rsa_pss_rsae_sha512
    0x0601, // rsa_pkcs1_sha512
];

/// Chrome 131 supported groups: GREASE, x25519, P-256, P-384.
pub const CHROME_131_GROUPS: &[u16] = &[GREASE_PLACEHOLDER, 0x001d, 0x0017, 0x0018];

/// Chrome 131 extension IDs in exact order, without GREASE. The second GREASE
/// extension goes right before padding.
pub const CHROME_131_EXTENSION_IDS: &[u16] =
    &[0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 21];

/// Safari 18 cipher suites in exact order.
pub const SAFARI_18_CIPHER_SUITES: &[u16] = &[
    GREASE_PLACEHOLDER,
    0x1301,
    0x1302,
    0x1303,
    0xc02c,
    0xc02b,
    0xcca9,
    0xc030,
    0xc02f,
    0xcca8,
    0xc00a,
    0xc009,
    0xc014,
    0xc013,
    0x009d,
    0x009c,
    0x0035,
    0x002f,
];

/// Safari 18 signature algorithms (still offers rsa_pkcs1_sha1).
pub const SAFARI_18_SIGNATURE_ALGORITHMS: &[u16] = &[
    0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601, 0x0201,
];

/// Safari 18 supported groups: GREASE, x25519, P-256, P-384, P-521.
pub const SAFARI_18_GROUPS: &[u16] = &[GREASE_PLACEHOLDER, 0x001d, 0x0017, 0x0018, 0x0019];

/// Supplies the Client Hello shape used for each handshake.
pub trait ClientHelloSource: Send + Sync {
    /// Ordered Client Hello for the next connection.
    fn client_hello_spec(&self) -> ClientHelloSpec;

    /// Browser user agent matching this shape, used as the session default.
    fn user_agent(&self) -> Option<String> {
        None
    }
}

impl ClientHelloSource for ClientHelloSpec {
    fn client_hello_spec(&self) -> ClientHelloSpec {
        self.clone()
    }
}

impl<F> ClientHelloSource for F
where
    F: Fn() -> ClientHelloSpec + Send + Sync,
{
    fn client_hello_spec(&self) -> ClientHelloSpec {
        self()
    }
}

/// Browser fingerprint profile for impersonation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FingerprintProfile {
    /// Chrome 131 on macOS. Chrome permutes extension order on every
    /// connection, so the profile enables engine-side permutation.
    #[default]
    Chrome131,
    /// Safari 18 on macOS: fixed extension order, no session ticket.
    Safari18,
}

impl FingerprintProfile {
    /// Get the User-Agent string for this profile.
    pub fn user_agent(&self) -> &'static str {
        match self {
            Self::Chrome131 => {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
            }
            Self::Safari18 => {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15"
            }
        }
    }

    /// Get the Client Hello for this profile.
    pub fn client_hello(&self) -> ClientHelloSpec {
        match self {
            Self::Chrome131 => chrome_131(),
            Self::Safari18 => safari_18(),
        }
    }
}

impl ClientHelloSource for FingerprintProfile {
    fn client_hello_spec(&self) -> ClientHelloSpec {
        self.client_hello()
    }

    fn user_agent(&self) -> Option<String> {
        Some(FingerprintProfile::user_agent(self).to_string())
    }
}

fn chrome_131() -> ClientHelloSpec {
    let extensions = CHROME_131_EXTENSION_IDS
        .iter()
        .filter(|&&id| id != 21)
        .map(|&id| match id {
            0 => TlsExtension::ServerName,
            23 => TlsExtension::ExtendedMasterSecret,
            65281 => TlsExtension::RenegotiationInfo,
            10 => TlsExtension::SupportedGroups(CHROME_131_GROUPS.to_vec()),
            11 => TlsExtension::EcPointFormats(vec![0]),
            35 => TlsExtension::SessionTicket,
            16 => TlsExtension::Alpn(vec![ALPN_H2.into(), ALPN_HTTP1.into()]),
            5 => TlsExtension::StatusRequest,
            13 => TlsExtension::SignatureAlgorithms(CHROME_131_SIGNATURE_ALGORITHMS.to_vec()),
            18 => TlsExtension::SignedCertificateTimestamp,
            51 => TlsExtension::KeyShare(vec![GREASE_PLACEHOLDER, 0x001d]),
            45 => TlsExtension::PskKeyExchangeModes(vec![1]),
            43 => TlsExtension::SupportedVersions(vec![GREASE_PLACEHOLDER, 0x0304, 0x0303]),
            27 => TlsExtension::CompressCertificate(vec![CertCompression::Brotli]),
            other => TlsExtension::Unknown {
                id: other,
                data: Vec::new(),
            },
        });

    ClientHelloSpec {
        cipher_suites: CHROME_131_CIPHER_SUITES.to_vec(),
        compression_methods: vec![0],
        extensions: std::iter::once(TlsExtension::Grease)
            .chain(extensions)
            .chain([TlsExtension::Grease, TlsExtension::Padding])
            .collect(),
        permute_extensions: true,
    }
}

fn safari_18() -> ClientHelloSpec {
    ClientHelloSpec {
        cipher_suites: SAFARI_18_CIPHER_SUITES.to_vec(),
        compression_methods: vec![0],
        extensions: vec![
            TlsExtension::Grease,
            TlsExtension::ServerName,
            TlsExtension::ExtendedMasterSecret,
            TlsExtension::RenegotiationInfo,
            TlsExtension::SupportedGroups(SAFARI_18_GROUPS.to_vec()),
            TlsExtension::EcPointFormats(vec![0]),
            TlsExtension::Alpn(vec![ALPN_H2.into(), ALPN_HTTP1.into()]),
            TlsExtension::StatusRequest,
            TlsExtension::SignatureAlgorithms(SAFARI_18_SIGNATURE_ALGORITHMS.to_vec()),
            TlsExtension::SignedCertificateTimestamp,
            TlsExtension::KeyShare(vec![GREASE_PLACEHOLDER, 0x001d]),
            TlsExtension::PskKeyExchangeModes(vec![1]),
            TlsExtension::SupportedVersions(vec![
                GREASE_PLACEHOLDER,
                0x0304,
                0x0303,
                0x0302,
                0x0301,
            ]),
            TlsExtension::CompressCertificate(vec![CertCompression::Zlib]),
            TlsExtension::Grease,
            TlsExtension::Padding,
        ],
        permute_extensions: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_chrome_extension_order() {
        let spec = FingerprintProfile::Chrome131.client_hello();
        let ids = spec.extension_ids();
        assert_eq!(ids.first(), Some(&GREASE_PLACEHOLDER));
        assert_eq!(ids[ids.len() - 2], GREASE_PLACEHOLDER);
        assert_eq!(ids.last(), Some(&21));
        let declared: Vec<u16> = ids.into_iter().filter(|&id| id != GREASE_PLACEHOLDER).collect();
        assert_eq!(declared, CHROME_131_EXTENSION_IDS);
        assert!(spec.permute_extensions);
        assert!(spec.uses_grease());
        assert!(!spec
            .extensions
            .iter()
            .any(|e| matches!(e, TlsExtension::Unknown { .. })));
    }

    #[test]
    fn test_safari_has_no_session_ticket() {
        let spec = FingerprintProfile::Safari18.client_hello();
        assert!(!spec.has_extension(35));
        assert!(!spec.permute_extensions);
    }

    #[test]
    fn test_chrome_ja3() {
        let spec = FingerprintProfile::Chrome131.client_hello();
        assert_eq!(
            spec.ja3(),
            "771,4865-4866-4867-49195-49199-49196-49200-52393-52392-49171-49172-156-157-47-53,\
             0-23-65281-10-11-35-16-5-13-18-51-45-43-27-21,29-23-24,0"
        );
    }

    #[test]
    fn test_profile_is_a_client_hello_source() {
        let source: Arc<dyn ClientHelloSource> = Arc::new(FingerprintProfile::Safari18);
        assert_eq!(
            source.user_agent().as_deref(),
            Some(FingerprintProfile::Safari18.user_agent())
        );
        assert_eq!(
            source.client_hello_spec(),
            FingerprintProfile::Safari18.client_hello()
        );

        let closure = || FingerprintProfile::Chrome131.client_hello().force_http1();
        assert_eq!(
            closure.client_hello_spec().alpn_protocols(),
            Some(&[ALPN_HTTP1.to_string()][..])
        );
        assert!(closure.user_agent().is_none());
    }
}
