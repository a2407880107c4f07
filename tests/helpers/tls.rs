use std::time::{Duration, SystemTime, UNIX_EPOCH};

use boring::asn1::Asn1Time;
use boring::bn::{BigNum, MsbOption};
use boring::ec::{EcGroup, EcKey};
use boring::hash::MessageDigest;
use boring::nid::Nid;
use boring::pkey::{PKey, Private};
use boring::ssl::{SslAcceptor, SslAcceptorBuilder, SslMethod};
use boring::x509::extension::{BasicConstraints, KeyUsage, SubjectAlternativeName};
use boring::x509::{X509Builder, X509NameBuilder, X509NameRef, X509};

pub const DAY: Duration = Duration::from_secs(86_400);

fn generate_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("P-256 group");
    let key = EcKey::generate(&group).expect("ec key");
    PKey::from_ec_key(key).expect("pkey")
}

fn asn1_time(t: SystemTime) -> Asn1Time {
    let secs = t.duration_since(UNIX_EPOCH).expect("after epoch").as_secs();
    Asn1Time::from_unix(secs as _).expect("asn1 time")
}

fn base_builder(
    cn: &str,
    key: &PKey<Private>,
    issuer: Option<&X509NameRef>,
    not_before: SystemTime,
    not_after: SystemTime,
) -> X509Builder {
    let mut name = X509NameBuilder::new().expect("x509 name");
    name.append_entry_by_nid(Nid::COMMONNAME, cn).expect("CN");
    let name = name.build();

    let mut builder = X509::builder().expect("x509 builder");
    builder.set_version(2).expect("version");
    let mut serial = BigNum::new().expect("serial");
    serial.rand(64, MsbOption::MAYBE_ZERO, false).expect("serial rand");
    builder
        .set_serial_number(&serial.to_asn1_integer().expect("serial asn1"))
        .expect("serial set");
    builder.set_subject_name(&name).expect("subject");
    builder
        .set_issuer_name(issuer.unwrap_or(&name))
        .expect("issuer");
    builder.set_pubkey(key).expect("pubkey");
    builder.set_not_before(&asn1_time(not_before)).expect("not_before");
    builder.set_not_after(&asn1_time(not_after)).expect("not_after");
    builder
}

/// A server certificate and its key.
pub struct Leaf {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl Leaf {
    /// Acceptor presenting this certificate.
    pub fn acceptor(&self) -> SslAcceptorBuilder {
        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())
            .expect("Failed to create SslAcceptor builder");
        builder
            .set_private_key(&self.key)
            .expect("Failed to set private key");
        builder
            .set_certificate(&self.cert)
            .expect("Failed to set certificate");
        builder
    }
}

/// Throwaway certificate authority.
pub struct TestPki {
    pub ca: X509,
    ca_key: PKey<Private>,
}

impl TestPki {
    pub fn new() -> Self {
        let now = SystemTime::now();
        let ca_key = generate_key();
        let mut builder =
            base_builder("Mimicry Test Root", &ca_key, None, now - DAY, now + 365 * DAY);
        let bc = BasicConstraints::new().critical().ca().build().expect("bc");
        builder.append_extension(&bc).expect("bc ext");
        let ku = KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .build()
            .expect("ku");
        builder.append_extension(&ku).expect("ku ext");
        builder.sign(&ca_key, MessageDigest::sha256()).expect("sign");

        Self {
            ca: builder.build(),
            ca_key,
        }
    }

    pub fn ca_der(&self) -> Vec<u8> {
        self.ca.to_der().expect("ca der")
    }

    pub fn ca_pem(&self) -> Vec<u8> {
        self.ca.to_pem().expect("ca pem")
    }

    /// Leaf valid from yesterday for thirty days.
    pub fn issue(&self, sans: &[&str]) -> Leaf {
        let now = SystemTime::now();
        self.issue_with_validity(sans, now - DAY, now + 30 * DAY)
    }

    pub fn issue_with_validity(
        &self,
        sans: &[&str],
        not_before: SystemTime,
        not_after: SystemTime,
    ) -> Leaf {
        let key = generate_key();
        let cn = sans.first().copied().unwrap_or("leaf");
        let mut builder = base_builder(
            cn,
            &key,
            Some(self.ca.subject_name()),
            not_before,
            not_after,
        );

        let bc = BasicConstraints::new().build().expect("bc");
        builder.append_extension(&bc).expect("bc ext");
        let ku = KeyUsage::new()
            .critical()
            .digital_signature()
            .build()
            .expect("ku");
        builder.append_extension(&ku).expect("ku ext");
        if !sans.is_empty() {
            let san = {
                let ctx = builder.x509v3_context(Some(&*self.ca), None);
                let mut san = SubjectAlternativeName::new();
                for name in sans {
                    if name.parse::<std::net::IpAddr>().is_ok() {
                        san.ip(name);
                    } else {
                        san.dns(name);
                    }
                }
                san.build(&ctx).expect("san")
            };
            builder.append_extension(&san).expect("san ext");
        }
        builder.sign(&self.ca_key, MessageDigest::sha256()).expect("sign");

        Leaf {
            cert: builder.build(),
            key,
        }
    }
}
