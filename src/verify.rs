//! Peer certificate verification.
//!
//! Runs after the TLS engine has built and validated a chain to a trusted
//! root. It layers the validity-window and hostname rules, then the pin set
//! registered for the address, on top of that chain. The verifier is a plain
//! value so it can be invoked directly with synthetic chains.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{HostnameMismatch, VerifyError};
use crate::pin::{spki_pin, PinManager};

/// The parts of an X.509 certificate the verifier looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    pub subject: String,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
    /// basicConstraints CA:TRUE.
    pub is_ca: bool,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    /// DER-encoded SubjectPublicKeyInfo.
    pub spki: Vec<u8>,
}

impl PeerCertificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, VerifyError> {
        let (_, cert) =
            X509Certificate::from_der(der).map_err(|e| VerifyError::Malformed(e.to_string()))?;

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        let san = cert
            .subject_alternative_name()
            .map_err(|e| VerifyError::Malformed(e.to_string()))?;
        if let Some(san) = san {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                    GeneralName::IPAddress(raw) => {
                        if let Some(ip) = ip_from_octets(raw) {
                            ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        let validity = cert.validity();
        Ok(Self {
            subject: cert.subject().to_string(),
            not_before: system_time(validity.not_before.timestamp()),
            not_after: system_time(validity.not_after.timestamp()),
            is_ca: cert.is_ca(),
            dns_names,
            ip_addresses,
            spki: cert.public_key().raw.to_vec(),
        })
    }

    /// `pin-sha256` of this certificate's public key.
    pub fn spki_pin(&self) -> String {
        spki_pin(&self.spki)
    }

    /// Check the validity window against `now`.
    pub fn check_validity(&self, now: SystemTime) -> Result<(), VerifyError> {
        if now < self.not_before {
            return Err(VerifyError::NotYetValid {
                subject: self.subject.clone(),
            });
        }
        if now > self.not_after {
            return Err(VerifyError::Expired {
                subject: self.subject.clone(),
            });
        }
        Ok(())
    }

    /// Check that this certificate is valid for `host` (a DNS name or an IP
    /// literal). Only subjectAltName entries are considered.
    pub fn verify_hostname(&self, host: &str) -> Result<(), HostnameMismatch> {
        let candidate = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = candidate.parse::<IpAddr>() {
            if self.ip_addresses.is_empty() {
                return Err(HostnameMismatch::NoIpSans(ip));
            }
            if self.ip_addresses.contains(&ip) {
                return Ok(());
            }
            return Err(HostnameMismatch::Ip {
                ip,
                ips: join(self.ip_addresses.iter()),
            });
        }

        let candidate = candidate.trim_end_matches('.').to_ascii_lowercase();
        if self
            .dns_names
            .iter()
            .any(|pattern| match_hostname(pattern, &candidate))
        {
            return Ok(());
        }

        if self.dns_names.is_empty() {
            Err(HostnameMismatch::NoNames(host.to_string()))
        } else {
            Err(HostnameMismatch::Name {
                host: host.to_string(),
                names: join(self.dns_names.iter()),
            })
        }
    }
}

/// Policy applied to the verified chains of one handshake.
#[derive(Debug, Clone)]
pub struct CertVerifier {
    hostname: String,
    pins: Option<Arc<PinManager>>,
    insecure: bool,
}

impl CertVerifier {
    pub fn new(hostname: impl Into<String>, pins: Option<Arc<PinManager>>, insecure: bool) -> Self {
        Self {
            hostname: hostname.into(),
            pins,
            insecure,
        }
    }

    /// Accept or reject the verified chains.
    ///
    /// Validity and hostname rules must hold for every certificate of every
    /// chain; the first violation rejects. Pinning then needs a single
    /// pinned certificate anywhere in the chains.
    pub fn verify(&self, chains: &[Vec<PeerCertificate>], now: SystemTime) -> Result<(), VerifyError> {
        if self.insecure {
            return Ok(());
        }

        for chain in chains {
            for cert in chain {
                cert.check_validity(now)?;
                if cert.is_ca {
                    continue;
                }
                cert.verify_hostname(&self.hostname)
                    .map_err(VerifyError::Hostname)?;
                tracing::trace!(subject = %cert.subject, host = %self.hostname, "certificate accepted");
            }
        }

        let Some(pins) = &self.pins else {
            return Ok(());
        };

        let pinned = chains
            .iter()
            .flat_map(|chain| chain.iter())
            .any(|cert| pins.verify(cert));
        if pinned {
            Ok(())
        } else {
            Err(VerifyError::PinMismatch)
        }
    }
}

/// RFC 6125 matching: exact, case-insensitive, or a `*` that stands for the
/// whole leftmost label.
fn match_hostname(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    if pattern.is_empty() || host.is_empty() {
        return false;
    }

    let pattern_labels: Vec<&str> = pattern.split('.').collect();
    let host_labels: Vec<&str> = host.split('.').collect();
    if pattern_labels.len() != host_labels.len() {
        return false;
    }

    pattern_labels
        .iter()
        .zip(&host_labels)
        .enumerate()
        .all(|(i, (p, h))| (i == 0 && *p == "*" && !h.is_empty()) || p == h)
}

fn ip_from_octets(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => <[u8; 4]>::try_from(raw).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(raw).ok().map(IpAddr::from),
        _ => None,
    }
}

fn system_time(unix: i64) -> SystemTime {
    if unix >= 0 {
        UNIX_EPOCH + Duration::from_secs(unix.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_secs(unix.unsigned_abs())
    }
}

fn join<T: std::fmt::Display>(items: impl Iterator<Item = T>) -> String {
    items.map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}
