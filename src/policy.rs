//! Signature algorithms and their sunset policies.
//!
//! A sunset policy names the date after which a signature algorithm is no
//! longer acceptable for a certificate's validity period. The table is
//! built once and shared read-only between scans.

use chrono::{DateTime, Utc};
use openssl::nid::Nid;
use openssl::pkey::Id;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumIter, EnumString};

/// 2009-01-01T00:00:00Z
const MD_SUNSET: i64 = 1_230_768_000;
/// 2017-01-01T00:00:00Z
const SHA1_SUNSET: i64 = 1_483_228_800;

/// Certificate signature algorithms known to the classifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
pub enum SignatureAlgorithm {
    #[strum(to_string = "MD2-RSA")]
    Md2WithRsa,
    #[strum(to_string = "MD5-RSA")]
    Md5WithRsa,
    #[strum(to_string = "SHA1-RSA")]
    Sha1WithRsa,
    #[strum(to_string = "SHA224-RSA")]
    Sha224WithRsa,
    #[strum(to_string = "SHA256-RSA")]
    Sha256WithRsa,
    #[strum(to_string = "SHA384-RSA")]
    Sha384WithRsa,
    #[strum(to_string = "SHA512-RSA")]
    Sha512WithRsa,
    #[strum(to_string = "RSASSA-PSS")]
    RsaPss,
    #[strum(to_string = "DSA-SHA1")]
    DsaWithSha1,
    #[strum(to_string = "DSA-SHA256")]
    DsaWithSha256,
    #[strum(to_string = "ECDSA-SHA1")]
    EcdsaWithSha1,
    #[strum(to_string = "ECDSA-SHA256")]
    EcdsaWithSha256,
    #[strum(to_string = "ECDSA-SHA384")]
    EcdsaWithSha384,
    #[strum(to_string = "ECDSA-SHA512")]
    EcdsaWithSha512,
    #[strum(to_string = "Ed25519")]
    Ed25519,
}

impl SignatureAlgorithm {
    /// Maps an OpenSSL signature algorithm NID to a known algorithm.
    pub fn from_nid(nid: Nid) -> Option<Self> {
        let algorithm = match nid {
            Nid::MD2WITHRSAENCRYPTION => Self::Md2WithRsa,
            Nid::MD5WITHRSAENCRYPTION => Self::Md5WithRsa,
            Nid::SHA1WITHRSAENCRYPTION => Self::Sha1WithRsa,
            Nid::SHA224WITHRSAENCRYPTION => Self::Sha224WithRsa,
            Nid::SHA256WITHRSAENCRYPTION => Self::Sha256WithRsa,
            Nid::SHA384WITHRSAENCRYPTION => Self::Sha384WithRsa,
            Nid::SHA512WITHRSAENCRYPTION => Self::Sha512WithRsa,
            Nid::RSASSAPSS => Self::RsaPss,
            Nid::DSAWITHSHA1 => Self::DsaWithSha1,
            Nid::DSA_WITH_SHA256 => Self::DsaWithSha256,
            Nid::ECDSA_WITH_SHA1 => Self::EcdsaWithSha1,
            Nid::ECDSA_WITH_SHA256 => Self::EcdsaWithSha256,
            Nid::ECDSA_WITH_SHA384 => Self::EcdsaWithSha384,
            Nid::ECDSA_WITH_SHA512 => Self::EcdsaWithSha512,
            // no Nid constant for Ed25519; its NID equals the key type id
            n if n.as_raw() == Id::ED25519.as_raw() => Self::Ed25519,
            _ => return None,
        };
        Some(algorithm)
    }
}

/// Readable algorithm name and the date it is sunset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SunsetPolicy {
    pub name: String,
    pub sunset_date: DateTime<Utc>,
}

/// Immutable lookup from algorithm to sunset policy.
#[derive(Debug, Clone, Default)]
pub struct SunsetPolicyTable {
    policies: HashMap<SignatureAlgorithm, SunsetPolicy>,
}

impl SunsetPolicyTable {
    /// The table of deprecated certificate signature algorithms.
    ///
    /// MD2 and MD5 use a fixed historical date so that the table does not
    /// depend on the wall clock at start-up.
    pub fn standard() -> Self {
        let md = timestamp(MD_SUNSET);
        let sha1 = timestamp(SHA1_SUNSET);
        Self::from_entries(vec![
            (SignatureAlgorithm::Md2WithRsa, "MD2 with RSA", md),
            (SignatureAlgorithm::Md5WithRsa, "MD5 with RSA", md),
            (SignatureAlgorithm::Sha1WithRsa, "SHA1 with RSA", sha1),
            (SignatureAlgorithm::DsaWithSha1, "DSA with SHA1", sha1),
            (SignatureAlgorithm::EcdsaWithSha1, "ECDSA with SHA1", sha1),
        ])
    }

    /// Builds a table from `(algorithm, name, sunset date)` entries.
    ///
    /// A later entry for the same algorithm replaces an earlier one, so the
    /// table never holds two policies for one algorithm.
    pub fn from_entries<N: Into<String>>(
        entries: Vec<(SignatureAlgorithm, N, DateTime<Utc>)>,
    ) -> Self {
        let policies = entries
            .into_iter()
            .map(|(algorithm, name, sunset_date)| {
                (
                    algorithm,
                    SunsetPolicy {
                        name: name.into(),
                        sunset_date,
                    },
                )
            })
            .collect();
        SunsetPolicyTable { policies }
    }

    pub fn get(&self, algorithm: SignatureAlgorithm) -> Option<&SunsetPolicy> {
        self.policies.get(&algorithm)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SignatureAlgorithm, &SunsetPolicy)> {
        self.policies.iter()
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
