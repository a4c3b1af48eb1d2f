//! Certificate classification.
//!
//! [`CertificateFacts`] holds the raw fields read from an X.509 certificate.
//! [`classify`] turns facts into a [`CertificateRecord`] by computing the
//! expiry countdown and applying the sunset policy table.

use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref};
use serde::Serialize;

use crate::policy::{SignatureAlgorithm, SunsetPolicy, SunsetPolicyTable};

/// Countdowns at or below this many hours are rendered in hours.
const HOURS_DISPLAY_LIMIT: i64 = 48;

/// Raw certificate fields needed for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateFacts {
    pub subject_common_name: String,
    pub issuer_common_name: String,
    pub algorithm: Option<SignatureAlgorithm>,
    pub algorithm_label: String,
    pub not_after: DateTime<Utc>,
    /// Raw signature bits, used as the deduplication key.
    pub signature: Vec<u8>,
}

impl CertificateFacts {
    /// Reads the classification fields out of an OpenSSL certificate.
    pub fn from_x509(cert: &X509Ref) -> Result<Self, ErrorStack> {
        let object = cert.signature_algorithm().object();
        let algorithm = SignatureAlgorithm::from_nid(object.nid());
        let algorithm_label = match algorithm {
            Some(known) => known.to_string(),
            None => object.to_string(),
        };

        Ok(CertificateFacts {
            subject_common_name: common_name(cert.subject_name()),
            issuer_common_name: common_name(cert.issuer_name()),
            algorithm,
            algorithm_label,
            not_after: asn1_time_to_utc(cert.not_after())?,
            signature: cert.signature().as_slice().to_vec(),
        })
    }
}

/// One classified certificate as seen on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateRecord {
    pub host_label: String,
    pub subject_common_name: String,
    pub issuer_common_name: String,
    pub signature_algorithm_label: String,
    pub not_after: DateTime<Utc>,
    pub expires_in_hours: i64,
    pub expires_in_text: String,
    pub expires_soon: bool,
    pub sunset_policy: Option<SunsetPolicy>,
    pub error_text: Option<String>,
}

/// Classifies one certificate against the warn threshold and sunset table.
///
/// `expires_soon` is set when the threshold lies strictly after `not_after`,
/// or when the certificate outlives the sunset date of its algorithm.
pub fn classify(
    host_label: &str,
    warn_threshold: DateTime<Utc>,
    now: DateTime<Utc>,
    facts: &CertificateFacts,
    policies: &SunsetPolicyTable,
) -> CertificateRecord {
    let mut expires_soon = warn_threshold > facts.not_after;

    let hours = hours_until(now, facts.not_after);

    let sunset_policy = facts
        .algorithm
        .and_then(|algorithm| policies.get(algorithm))
        .cloned();
    if let Some(policy) = &sunset_policy {
        if facts.not_after >= policy.sunset_date {
            expires_soon = true;
        }
    }

    CertificateRecord {
        host_label: host_label.to_string(),
        subject_common_name: facts.subject_common_name.clone(),
        issuer_common_name: facts.issuer_common_name.clone(),
        signature_algorithm_label: facts.algorithm_label.clone(),
        not_after: facts.not_after,
        expires_in_hours: hours,
        expires_in_text: format_expires_in(hours),
        expires_soon,
        sunset_policy,
        error_text: None,
    }
}

/// Whole hours from `now` until `not_after`, truncated toward zero.
pub fn hours_until(now: DateTime<Utc>, not_after: DateTime<Utc>) -> i64 {
    (not_after - now).num_hours()
}

/// Renders an hour count as `"N hours"`, or `"N days"` past two days.
pub fn format_expires_in(hours: i64) -> String {
    if hours <= HOURS_DISPLAY_LIMIT {
        format!("{} hours", hours)
    } else {
        format!("{} days", hours / 24)
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .map(|entry| {
            entry
                .data()
                .to_string()
                .unwrap_or_else(|_| String::from_utf8_lossy(entry.data().as_slice()).into_owned())
        })
        .unwrap_or_default()
}

fn asn1_time_to_utc(time: &Asn1TimeRef) -> Result<DateTime<Utc>, ErrorStack> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    Ok(DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC))
}
