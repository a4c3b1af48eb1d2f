//! Test PKI and a loopback TLS server.

#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{SslAcceptor, SslMethod};
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};
use std::io::Write;
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

pub const HOUR: i64 = 3600;
pub const DAY: i64 = 24 * HOUR;

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

/// A certificate together with its private key.
pub struct Issued {
    pub cert: X509,
    pub key: PKey<Private>,
}

/// What to put into a generated certificate.
pub struct CertSpec<'a> {
    pub common_name: &'a str,
    pub not_before: i64,
    pub not_after: i64,
    pub ca: bool,
    pub dns_names: &'a [&'a str],
    /// Adds `127.0.0.1` as an IP SAN
    pub ip_san: bool,
    pub digest: MessageDigest,
}

impl<'a> CertSpec<'a> {
    pub fn ca(common_name: &'a str) -> Self {
        CertSpec {
            common_name,
            not_before: now() - DAY,
            not_after: now() + 3650 * DAY,
            ca: true,
            dns_names: &[],
            ip_san: false,
            digest: MessageDigest::sha256(),
        }
    }

    pub fn leaf(common_name: &'a str) -> Self {
        CertSpec {
            common_name,
            not_before: now() - DAY,
            not_after: now() + 90 * DAY,
            ca: false,
            dns_names: &["localhost"],
            ip_san: true,
            digest: MessageDigest::sha256(),
        }
    }
}

/// Issues a certificate; self-signed when `issuer` is `None`.
pub fn issue(spec: &CertSpec<'_>, key: PKey<Private>, issuer: Option<&Issued>) -> Issued {
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, spec.common_name)
        .unwrap();
    let name = name.build();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some(issuer) => builder
            .set_issuer_name(issuer.cert.subject_name())
            .unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }

    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(spec.not_before).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(spec.not_after).unwrap())
        .unwrap();

    if spec.ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .unwrap(),
            )
            .unwrap();
    } else if !spec.dns_names.is_empty() || spec.ip_san {
        let mut san = SubjectAlternativeName::new();
        for dns in spec.dns_names {
            san.dns(dns);
        }
        if spec.ip_san {
            san.ip("127.0.0.1");
        }
        let extension = san
            .build(&builder.x509v3_context(issuer.map(|i| &*i.cert), None))
            .unwrap();
        builder.append_extension(extension).unwrap();
    }

    let signing_key = issuer.map(|i| &i.key).unwrap_or(&key);
    builder.sign(signing_key, spec.digest).unwrap();

    Issued {
        cert: builder.build(),
        key,
    }
}

/// Root, intermediate and a leaf valid for 127.0.0.1.
pub struct Pki {
    pub root: Issued,
    pub intermediate: Issued,
}

impl Pki {
    pub fn new() -> Self {
        let root = issue(&CertSpec::ca("Test Root CA"), ec_key(), None);
        let intermediate = issue(&CertSpec::ca("Test Intermediate CA"), ec_key(), Some(&root));
        Pki { root, intermediate }
    }

    pub fn leaf(&self, spec: &CertSpec<'_>) -> Issued {
        issue(spec, ec_key(), Some(&self.intermediate))
    }
}

/// Serves `leaf` plus `chain` on a loopback port for `connections`
/// handshakes and returns the `127.0.0.1:port` address.
pub fn serve(leaf: &Issued, chain: &[&X509], connections: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    acceptor.set_private_key(&leaf.key).unwrap();
    acceptor.set_certificate(&leaf.cert).unwrap();
    for cert in chain {
        acceptor.add_extra_chain_cert((*cert).clone()).unwrap();
    }
    let acceptor = acceptor.build();

    thread::spawn(move || {
        for stream in listener.incoming().take(connections) {
            if let Ok(stream) = stream {
                if let Ok(mut tls) = acceptor.accept(stream) {
                    let _ = tls.shutdown();
                }
            }
        }
    });

    address
}

/// A loopback address with nothing listening on it.
pub fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

/// A loopback address that accepts one connection and never speaks.
pub fn silent_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            thread::sleep(Duration::from_secs(5));
            drop(stream);
        }
    });
    address
}

/// A loopback address that starts a maximum-size TLS handshake record and
/// then sends its body one byte every 100ms.
pub fn trickling_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            if stream.write_all(&[0x16, 0x03, 0x03, 0x40, 0x00]).is_err() {
                return;
            }
            for _ in 0..50 {
                if stream.write_all(&[0]).is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
    });
    address
}
