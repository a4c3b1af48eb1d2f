//! certsunset inspects the TLS certificate chains served by a list of hosts
//! and reports, for every distinct certificate, its subject, issuer,
//! signature algorithm and time to expiry. Certificates signed with an
//! algorithm past its sunset date are flagged, as are certificates that
//! expire within a lookahead window.
//!
//! ```no_run
//! use certsunset::{Inspector, InspectorOptions, Lookahead, Scanner, SunsetPolicyTable};
//! use std::sync::Arc;
//!
//! let policies = Arc::new(SunsetPolicyTable::standard());
//! let inspector = Inspector::new(policies, InspectorOptions::default())?;
//! let result = Scanner::new(inspector, 4).scan(&["example.com"], Lookahead::new(0, 0, 30));
//! for record in result.records() {
//!     println!("{} {} {}", record.host_label, record.subject_common_name, record.expires_in_text);
//! }
//! # Ok::<(), certsunset::ConnectionError>(())
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod hosts;
pub mod inspector;
pub mod metrics;
pub mod policy;
pub mod report;
pub mod scan;

pub use classifier::{classify, CertificateFacts, CertificateRecord};
pub use error::ConnectionError;
pub use inspector::{CertificateSet, Inspector, InspectorOptions};
pub use policy::{SignatureAlgorithm, SunsetPolicy, SunsetPolicyTable};
pub use report::OutputFormat;
pub use scan::{HostResult, Lookahead, ScanResult, Scanner};
