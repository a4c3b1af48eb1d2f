//! Scan orchestration across many hosts.

use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use tracing::{info, warn};

use crate::classifier::CertificateRecord;
use crate::error::ConnectionError;
use crate::inspector::{CertificateSet, Inspector};

/// Forward offset from now used to flag certificates expiring soon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lookahead {
    pub years: u32,
    pub months: u32,
    pub days: u32,
}

impl Lookahead {
    pub fn new(years: u32, months: u32, days: u32) -> Self {
        Lookahead {
            years,
            months,
            days,
        }
    }

    /// The absolute warn threshold for a scan started at `now`.
    ///
    /// Years and months are added on the calendar first, then days.
    /// Saturates at the maximum representable time.
    pub fn threshold_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let months = self.years.saturating_mul(12).saturating_add(self.months);
        now.checked_add_months(Months::new(months))
            .and_then(|t| t.checked_add_days(Days::new(u64::from(self.days))))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Certificates found for one input host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostResult {
    pub host_label: String,
    pub certificates: CertificateSet,
    /// Why the host produced no certificates, when it could not be reached
    pub failure: Option<String>,
}

impl HostResult {
    fn from_inspection(host_label: &str, result: Result<CertificateSet, ConnectionError>) -> Self {
        match result {
            Ok(certificates) => HostResult {
                host_label: host_label.to_string(),
                certificates,
                failure: None,
            },
            Err(e) => {
                warn!("skipping {}: {}", host_label, e);
                HostResult {
                    host_label: host_label.to_string(),
                    certificates: CertificateSet::new(),
                    failure: Some(e.to_string()),
                }
            }
        }
    }
}

/// Results of one scan, in input order unless sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub hosts: Vec<HostResult>,
}

impl ScanResult {
    /// Every record across all hosts, host by host.
    pub fn records(&self) -> impl Iterator<Item = &CertificateRecord> {
        self.hosts.iter().flat_map(|host| host.certificates.records())
    }

    /// Reorders hosts lexically by label.
    pub fn sort_by_host(&mut self) {
        self.hosts.sort_by(|a, b| a.host_label.cmp(&b.host_label));
    }

    /// True if any record expires within the window, uses a sunset
    /// algorithm past its date, or failed verification.
    pub fn needs_attention(&self) -> bool {
        self.records()
            .any(|record| record.expires_soon || record.error_text.is_some())
    }
}

/// Runs the inspector over a list of hosts.
pub struct Scanner {
    inspector: Inspector,
    concurrency: usize,
}

impl Scanner {
    /// `concurrency` of 1 scans hosts one after another; 0 is treated as 1.
    pub fn new(inspector: Inspector, concurrency: usize) -> Self {
        Scanner {
            inspector,
            concurrency: concurrency.max(1),
        }
    }

    /// Scans every host against a single threshold computed from now.
    pub fn scan<S: AsRef<str> + Sync>(&self, hosts: &[S], lookahead: Lookahead) -> ScanResult {
        let warn_threshold = lookahead.threshold_from(Utc::now());
        self.scan_until(hosts, warn_threshold)
    }

    /// Scans every host against an explicit warn threshold.
    pub fn scan_until<S: AsRef<str> + Sync>(
        &self,
        hosts: &[S],
        warn_threshold: DateTime<Utc>,
    ) -> ScanResult {
        info!(
            "scanning {} host(s), warn threshold {}",
            hosts.len(),
            warn_threshold
        );

        if self.concurrency == 1 || hosts.len() <= 1 {
            let hosts = hosts
                .iter()
                .map(|host| {
                    let host = host.as_ref();
                    HostResult::from_inspection(host, self.inspector.inspect(host, warn_threshold))
                })
                .collect();
            return ScanResult { hosts };
        }

        let workers = self.concurrency.min(hosts.len());
        let next = AtomicUsize::new(0);
        let mut slots: Vec<Option<HostResult>> = vec![None; hosts.len()];

        thread::scope(|scope| {
            let (sender, receiver) = mpsc::channel();
            for _ in 0..workers {
                let sender = sender.clone();
                let next = &next;
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(host) = hosts.get(index) else {
                        break;
                    };
                    let host = host.as_ref();
                    let result =
                        HostResult::from_inspection(host, self.inspector.inspect(host, warn_threshold));
                    if sender.send((index, result)).is_err() {
                        break;
                    }
                });
            }
            drop(sender);

            for (index, result) in receiver {
                slots[index] = Some(result);
            }
        });

        ScanResult {
            hosts: slots.into_iter().flatten().collect(),
        }
    }
}
