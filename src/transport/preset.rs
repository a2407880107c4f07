//! Applies a [`ClientHelloSpec`] to the BoringSSL client.
//!
//! Context-wide settings (cipher, group and signature lists, versions,
//! GREASE, permutation, OCSP/SCT requests, certificate compression) go on the
//! `SslConnectorBuilder`. ALPS and ECH GREASE are per-connection and are
//! returned as a [`ConnectionPreset`] for the `ConnectConfiguration`.
//!
//! Every value the engine cannot emit is rejected with [`PresetError`]; no
//! library default is substituted. That includes extension order: with
//! permutation off the engine writes extensions in a fixed order, so a spec
//! declaring any other order is refused.

use std::io::Read;
use std::os::raw::c_int;

use boring::ssl::{ConnectConfiguration, SslConnectorBuilder, SslOptions, SslVersion};
use boring_sys::{CRYPTO_BUFFER, SSL, SSL_CTX};
use foreign_types::ForeignTypeRef;

use crate::error::PresetError;
use crate::fingerprint::tls::{
    is_grease, CertCompression, ClientHelloSpec, TlsExtension, GREASE_PLACEHOLDER,
};

extern "C" {
    fn SSL_CTX_set_grease_enabled(ctx: *mut SSL_CTX, enabled: c_int);
    fn SSL_CTX_set_permute_extensions(ctx: *mut SSL_CTX, enabled: c_int);
    fn SSL_set_enable_ech_grease(ssl: *mut SSL, enable: c_int);
    fn SSL_add_application_settings(
        ssl: *mut SSL,
        proto: *const u8,
        proto_len: usize,
        settings: *const u8,
        settings_len: usize,
    ) -> c_int;
}

/// BoringSSL name of a TLS 1.2 cipher suite. TLS 1.3 suites are fixed by the
/// engine and map to `None`.
fn cipher_name(id: u16) -> Result<Option<&'static str>, PresetError> {
    Ok(Some(match id {
        0x1301..=0x1303 => return Ok(None),
        0xc02b => "ECDHE-ECDSA-AES128-GCM-SHA256",
        0xc02f => "ECDHE-RSA-AES128-GCM-SHA256",
        0xc02c => "ECDHE-ECDSA-AES256-GCM-SHA384",
        0xc030 => "ECDHE-RSA-AES256-GCM-SHA384",
        0xcca9 => "ECDHE-ECDSA-CHACHA20-POLY1305",
        0xcca8 => "ECDHE-RSA-CHACHA20-POLY1305",
        0xc009 => "ECDHE-ECDSA-AES128-SHA",
        0xc00a => "ECDHE-ECDSA-AES256-SHA",
        0xc013 => "ECDHE-RSA-AES128-SHA",
        0xc014 => "ECDHE-RSA-AES256-SHA",
        0x009c => "AES128-GCM-SHA256",
        0x009d => "AES256-GCM-SHA384",
        0x002f => "AES128-SHA",
        0x0035 => "AES256-SHA",
        0x000a => "DES-CBC3-SHA",
        other => return Err(PresetError::UnsupportedCipher(other)),
    }))
}

fn group_name(id: u16) -> Result<&'static str, PresetError> {
    Ok(match id {
        0x001d => "X25519",
        0x0017 => "P-256",
        0x0018 => "P-384",
        0x0019 => "P-521",
        0x11ec => "X25519MLKEM768",
        0x6399 => "X25519Kyber768Draft00",
        other => return Err(PresetError::UnsupportedGroup(other)),
    })
}

fn sigalg_name(id: u16) -> Result<&'static str, PresetError> {
    Ok(match id {
        0x0403 => "ecdsa_secp256r1_sha256",
        0x0503 => "ecdsa_secp384r1_sha384",
        0x0603 => "ecdsa_secp521r1_sha512",
        0x0804 => "rsa_pss_rsae_sha256",
        0x0805 => "rsa_pss_rsae_sha384",
        0x0806 => "rsa_pss_rsae_sha512",
        0x0401 => "rsa_pkcs1_sha256",
        0x0501 => "rsa_pkcs1_sha384",
        0x0601 => "rsa_pkcs1_sha512",
        0x0201 => "rsa_pkcs1_sha1",
        0x0203 => "ecdsa_sha1",
        0x0807 => "ed25519",
        other => return Err(PresetError::UnsupportedSignatureAlgorithm(other)),
    })
}

fn ssl_version(id: u16) -> Result<SslVersion, PresetError> {
    Ok(match id {
        0x0301 => SslVersion::TLS1,
        0x0302 => SslVersion::TLS1_1,
        0x0303 => SslVersion::TLS1_2,
        0x0304 => SslVersion::TLS1_3,
        other => return Err(PresetError::UnsupportedVersion(other)),
    })
}

/// Order in which the engine writes the extensions it supports when
/// permutation is off. GREASE comes first and again right after this table;
/// padding is always last.
const ENGINE_EXTENSION_ORDER: &[u16] = &[
    0, 65037, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513,
];

/// Reject extension sequences the engine would put on the wire in a
/// different order.
fn check_extension_order(spec: &ClientHelloSpec) -> Result<(), PresetError> {
    let exts = &spec.extensions;
    let grease: Vec<usize> = (0..exts.len()).filter(|&i| is_grease(exts[i].id())).collect();
    if spec.uses_grease() && (grease.len() != 2 || grease[0] != 0) {
        return Err(PresetError::UnsupportedExtensionOrder(GREASE_PLACEHOLDER));
    }

    let mut prev_rank: Option<usize> = None;
    let mut table_closed = false;
    for (i, ext) in exts.iter().enumerate() {
        let id = ext.id();
        if matches!(ext, TlsExtension::Padding) {
            if i + 1 != exts.len() {
                return Err(PresetError::UnsupportedExtensionOrder(id));
            }
            continue;
        }
        if is_grease(id) {
            table_closed = i > 0;
            continue;
        }
        if table_closed {
            return Err(PresetError::UnsupportedExtensionOrder(id));
        }

        let rank = ENGINE_EXTENSION_ORDER
            .iter()
            .position(|&known| known == id)
            .ok_or(PresetError::UnsupportedExtension(id))?;
        if !spec.permute_extensions && prev_rank.is_some_and(|prev| rank <= prev) {
            return Err(PresetError::UnsupportedExtensionOrder(id));
        }
        prev_rank = Some(rank);
    }
    Ok(())
}

/// Colon-separated engine list of the non-GREASE entries of `ids`.
fn name_list<F>(ids: &[u16], name: F) -> Result<String, PresetError>
where
    F: Fn(u16) -> Result<Option<&'static str>, PresetError>,
{
    let mut names = Vec::with_capacity(ids.len());
    for &id in ids.iter().filter(|&&id| !is_grease(id)) {
        if let Some(n) = name(id)? {
            names.push(n);
        }
    }
    Ok(names.join(":"))
}

/// ALPN wire format: each protocol prefixed by its length.
pub(crate) fn encode_alpn(protocols: &[String]) -> Result<Vec<u8>, PresetError> {
    let mut wire = Vec::new();
    for proto in protocols {
        let len = u8::try_from(proto.len())
            .ok()
            .filter(|&len| len > 0)
            .ok_or_else(|| PresetError::InvalidAlpn(format!("{protocols:?}")))?;
        wire.push(len);
        wire.extend_from_slice(proto.as_bytes());
    }
    Ok(wire)
}

/// Settings that must be applied to each connection's `SSL` object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ConnectionPreset {
    pub server_name: bool,
    pub alps_protocols: Vec<String>,
    pub ech_grease: bool,
}

impl ConnectionPreset {
    pub(crate) fn apply(&self, config: &mut ConnectConfiguration) -> Result<(), PresetError> {
        config.set_use_server_name_indication(self.server_name);

        let ssl = config.as_ptr();
        for proto in &self.alps_protocols {
            // SAFETY: `ssl` is live for the borrow of `config`; BoringSSL
            // copies both buffers.
            let ok = unsafe {
                SSL_add_application_settings(
                    ssl,
                    proto.as_ptr(),
                    proto.len(),
                    std::ptr::null(),
                    0,
                )
            };
            if ok != 1 {
                return Err(PresetError::Engine {
                    context: "add application settings",
                    source: boring::error::ErrorStack::get(),
                });
            }
        }
        if self.ech_grease {
            // SAFETY: as above.
            unsafe { SSL_set_enable_ech_grease(ssl, 1) };
        }
        Ok(())
    }
}

/// Configure `builder` to emit `spec`'s Client Hello.
pub(crate) fn apply_preset(
    builder: &mut SslConnectorBuilder,
    spec: &ClientHelloSpec,
) -> Result<ConnectionPreset, PresetError> {
    let ciphers = name_list(&spec.cipher_suites, cipher_name)?;
    if !ciphers.is_empty() {
        builder
            .set_cipher_list(&ciphers)
            .map_err(PresetError::engine("set cipher list"))?;
    }

    let mut preset = ConnectionPreset::default();
    let mut versions: Option<(SslVersion, SslVersion)> = None;
    let mut session_ticket = false;
    let mut compression: Vec<CertCompression> = Vec::new();

    for ext in &spec.extensions {
        match ext {
            TlsExtension::Grease
            | TlsExtension::ExtendedMasterSecret
            | TlsExtension::RenegotiationInfo
            | TlsExtension::EcPointFormats(_)
            | TlsExtension::KeyShare(_)
            | TlsExtension::PskKeyExchangeModes(_)
            | TlsExtension::Padding => {}
            TlsExtension::ServerName => preset.server_name = true,
            TlsExtension::StatusRequest => builder.enable_ocsp_stapling(),
            TlsExtension::SignedCertificateTimestamp => builder.enable_signed_cert_timestamps(),
            TlsExtension::SessionTicket => session_ticket = true,
            TlsExtension::SupportedGroups(groups) => {
                let curves = name_list(groups, |id| group_name(id).map(Some))?;
                builder
                    .set_curves_list(&curves)
                    .map_err(PresetError::engine("set curves list"))?;
            }
            TlsExtension::SignatureAlgorithms(algs) => {
                let sigalgs = name_list(algs, |id| sigalg_name(id).map(Some))?;
                builder
                    .set_sigalgs_list(&sigalgs)
                    .map_err(PresetError::engine("set signature algorithms"))?;
            }
            TlsExtension::Alpn(protocols) => {
                builder
                    .set_alpn_protos(&encode_alpn(protocols)?)
                    .map_err(PresetError::engine("set ALPN"))?;
            }
            TlsExtension::SupportedVersions(ids) => {
                for &id in ids.iter().filter(|&&id| !is_grease(id)) {
                    let v = ssl_version(id)?;
                    versions = Some(match versions {
                        None => (v, v),
                        Some((lo, hi)) => (
                            if id < version_id(lo) { v } else { lo },
                            if id > version_id(hi) { v } else { hi },
                        ),
                    });
                }
            }
            TlsExtension::CompressCertificate(algs) => compression.extend(algs.iter().copied()),
            TlsExtension::ApplicationSettings { codepoint, protocols } => {
                if *codepoint != TlsExtension::ALPS_OLD_CODEPOINT {
                    return Err(PresetError::UnsupportedExtension(*codepoint));
                }
                preset.alps_protocols.extend(protocols.iter().cloned());
            }
            TlsExtension::EchGrease => preset.ech_grease = true,
            TlsExtension::Unknown { id, .. } => {
                if !is_grease(*id) {
                    return Err(PresetError::UnsupportedExtension(*id));
                }
            }
        }
    }

    check_extension_order(spec)?;

    // Without supported_versions a client cannot offer TLS 1.3.
    let (min, max) = versions.unwrap_or((SslVersion::TLS1_2, SslVersion::TLS1_2));
    builder
        .set_min_proto_version(Some(min))
        .map_err(PresetError::engine("set min TLS version"))?;
    builder
        .set_max_proto_version(Some(max))
        .map_err(PresetError::engine("set max TLS version"))?;

    if !session_ticket {
        builder.set_options(SslOptions::NO_TICKET);
    }

    let ctx = builder.as_ptr() as *mut SSL_CTX;
    // SAFETY: `ctx` is owned by `builder`, which outlives these calls.
    unsafe {
        SSL_CTX_set_grease_enabled(ctx, c_int::from(spec.uses_grease()));
        SSL_CTX_set_permute_extensions(ctx, c_int::from(spec.permute_extensions));
    }

    for alg in compression {
        let decompress: CertDecompressFn = match alg {
            CertCompression::Brotli => decompress_brotli_cert,
            CertCompression::Zlib => decompress_zlib_cert,
            CertCompression::Zstd => return Err(PresetError::UnsupportedCompression(alg.id())),
        };
        // SAFETY: as above; the callback is a plain function.
        let ok = unsafe {
            boring_sys::SSL_CTX_add_cert_compression_alg(ctx, alg.id(), None, Some(decompress))
        };
        if ok != 1 {
            return Err(PresetError::Engine {
                context: "add certificate compression algorithm",
                source: boring::error::ErrorStack::get(),
            });
        }
    }

    // Padding and engine-mandated extensions may still differ on the wire.
    tracing::debug!(
        declared_ja3 = %spec.ja3(),
        permute = spec.permute_extensions,
        "applied client hello preset"
    );
    Ok(preset)
}

fn version_id(v: SslVersion) -> u16 {
    if v == SslVersion::TLS1 {
        0x0301
    } else if v == SslVersion::TLS1_1 {
        0x0302
    } else if v == SslVersion::TLS1_2 {
        0x0303
    } else {
        0x0304
    }
}

type CertDecompressFn =
    unsafe extern "C" fn(*mut SSL, *mut *mut CRYPTO_BUFFER, usize, *const u8, usize) -> c_int;

/// Hand a decompressed certificate to BoringSSL, which copies it.
unsafe fn emit_certificate(
    result: std::io::Result<usize>,
    decompressed: &[u8],
    uncompressed_len: usize,
    out: *mut *mut CRYPTO_BUFFER,
) -> c_int {
    match result {
        Ok(_) if decompressed.len() == uncompressed_len => {
            let buffer = boring_sys::CRYPTO_BUFFER_new(
                decompressed.as_ptr(),
                decompressed.len(),
                std::ptr::null_mut(),
            );
            if buffer.is_null() {
                return 0;
            }
            *out = buffer;
            1
        }
        _ => 0,
    }
}

unsafe extern "C" fn decompress_brotli_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    let result = brotli::Decompressor::new(compressed, 4096)
        .take(uncompressed_len as u64 + 1)
        .read_to_end(&mut decompressed);
    emit_certificate(result, &decompressed, uncompressed_len, out)
}

unsafe extern "C" fn decompress_zlib_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    let result = flate2::read::ZlibDecoder::new(compressed)
        .take(uncompressed_len as u64 + 1)
        .read_to_end(&mut decompressed);
    emit_certificate(result, &decompressed, uncompressed_len, out)
}
