use lazy_static::lazy_static;
use prometheus::{labels, register_gauge_vec, GaugeVec};
use tracing::debug;

use crate::classifier::CertificateRecord;
use crate::scan::ScanResult;

const LABELS: &[&str] = &["host", "subject", "issuer", "algorithm"];

lazy_static! {
    static ref HOURS_BEFORE_EXPIRY: GaugeVec = register_gauge_vec!(
        "certsunset_hours_before_expiry",
        "hours before certificate expiration",
        LABELS
    )
    .unwrap();
    static ref EXPIRES_SOON: GaugeVec = register_gauge_vec!(
        "certsunset_expires_soon",
        "1 if the certificate expires within the lookahead window or outlives its algorithm",
        LABELS
    )
    .unwrap();
    static ref SUNSET_ALGORITHM: GaugeVec = register_gauge_vec!(
        "certsunset_sunset_algorithm",
        "1 if the certificate is signed with a sunset algorithm",
        LABELS
    )
    .unwrap();
    static ref VERIFICATION_FAILED: GaugeVec = register_gauge_vec!(
        "certsunset_verification_failed",
        "1 if the TLS handshake rejected the certificate",
        LABELS
    )
    .unwrap();
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Sets the gauges for one certificate record.
pub fn record_certificate(record: &CertificateRecord) {
    let values = [
        record.host_label.as_str(),
        record.subject_common_name.as_str(),
        record.issuer_common_name.as_str(),
        record.signature_algorithm_label.as_str(),
    ];
    HOURS_BEFORE_EXPIRY
        .with_label_values(&values)
        .set(record.expires_in_hours as f64);
    EXPIRES_SOON
        .with_label_values(&values)
        .set(flag(record.expires_soon));
    SUNSET_ALGORITHM
        .with_label_values(&values)
        .set(flag(record.sunset_policy.is_some()));
    VERIFICATION_FAILED
        .with_label_values(&values)
        .set(flag(record.error_text.is_some()));
}

/// Function to push metrics to prometheus
/// # Arguments
/// * `scan` - Result of the scan
/// * `prometheus_address` - Push gateway base address
pub fn prometheus_metrics(
    scan: &ScanResult,
    prometheus_address: &str,
) -> Result<(), prometheus::Error> {
    for record in scan.records() {
        record_certificate(record);
    }

    let metric_families = prometheus::gather();
    debug!(
        "pushing {} metric families to {}",
        metric_families.len(),
        prometheus_address
    );
    prometheus::push_metrics(
        "certsunset",
        labels! {
            "instance".to_owned() => "certsunset".to_owned(),
        },
        &format!("{}/metrics/job", prometheus_address.trim_end_matches('/')),
        metric_families,
        None,
    )
}
