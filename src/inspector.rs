//! TLS chain inspection.
//!
//! The [`Inspector`] connects to one host, performs a verifying TLS
//! handshake and classifies every distinct certificate it sees. A handshake
//! rejected because of a certificate still yields that certificate, with
//! the failure recorded in its `error_text`.

use chrono::{DateTime, Utc};
use openssl::ssl::{HandshakeError, SslConnector, SslMethod, SslStream, SslVerifyMode};
use openssl::x509::{X509Ref, X509VerifyResult, X509};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use crate::classifier::{classify, CertificateFacts, CertificateRecord};
use crate::error::{is_timeout, ConnectionError};
use crate::policy::SunsetPolicyTable;

/// Port used when a host label carries none.
pub const DEFAULT_PORT: u16 = 443;

/// Default bound on connect and handshake for one host.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Certificates of one host keyed by signature bytes, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateSet {
    entries: Vec<(Vec<u8>, CertificateRecord)>,
}

impl CertificateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record unless one with the same signature exists.
    ///
    /// Returns false when the signature was already present.
    pub fn insert(&mut self, signature: Vec<u8>, record: CertificateRecord) -> bool {
        if self.contains(&signature) {
            return false;
        }
        self.entries.push((signature, record));
        true
    }

    pub fn contains(&self, signature: &[u8]) -> bool {
        self.entries.iter().any(|(key, _)| key.as_slice() == signature)
    }

    pub fn get(&self, signature: &[u8]) -> Option<&CertificateRecord> {
        self.entries
            .iter()
            .find(|(key, _)| key.as_slice() == signature)
            .map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &CertificateRecord> {
        self.entries.iter().map(|(_, record)| record)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &CertificateRecord)> {
        self.entries
            .iter()
            .map(|(key, record)| (key.as_slice(), record))
    }
}

/// Connection settings for an [`Inspector`].
#[derive(Debug, Clone)]
pub struct InspectorOptions {
    /// Bound on one host, from the first TCP connect attempt until the
    /// handshake completes
    pub timeout: Duration,
    /// Trust anchors added to the platform default store
    pub extra_roots: Vec<X509>,
}

impl Default for InspectorOptions {
    fn default() -> Self {
        InspectorOptions {
            timeout: DEFAULT_TIMEOUT,
            extra_roots: Vec::new(),
        }
    }
}

/// Outcome of a handshake that produced certificate data.
enum Handshake {
    /// Handshake succeeded; the verified chains, leaf first
    Verified(Vec<Vec<X509>>),
    /// Handshake was rejected because of this certificate
    Rejected { certificate: X509, reason: String },
}

/// First certificate the verify callback refused, with OpenSSL's reason.
struct VerifyFailure {
    certificate: X509,
    reason: String,
}

/// Inspects the certificate chains served by single hosts.
pub struct Inspector {
    connector: SslConnector,
    policies: Arc<SunsetPolicyTable>,
    timeout: Duration,
}

impl Inspector {
    /// Builds an inspector using the platform trust store plus any extra
    /// roots from `options`.
    pub fn new(
        policies: Arc<SunsetPolicyTable>,
        options: InspectorOptions,
    ) -> Result<Self, ConnectionError> {
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        for root in options.extra_roots {
            builder.cert_store_mut().add_cert(root)?;
        }
        Ok(Inspector {
            connector: builder.build(),
            policies,
            timeout: options.timeout,
        })
    }

    /// Connects to `host_label` and classifies the certificates it serves.
    pub fn inspect(
        &self,
        host_label: &str,
        warn_threshold: DateTime<Utc>,
    ) -> Result<CertificateSet, ConnectionError> {
        let address = normalize_address(host_label)?;
        let label = address.to_string();
        debug!("inspecting {}", label);

        let handshake = self.handshake(&address)?;
        let now = Utc::now();

        match handshake {
            Handshake::Verified(chains) => certificates_from_chains(
                &label,
                &chains,
                warn_threshold,
                now,
                &self.policies,
            ),
            Handshake::Rejected {
                certificate,
                reason,
            } => {
                debug!("{} rejected: {}", label, reason);
                let facts = read_facts(&label, &certificate)?;
                let mut record = classify(&label, warn_threshold, now, &facts, &self.policies);
                record.error_text = Some(reason);
                let mut set = CertificateSet::new();
                set.insert(facts.signature, record);
                Ok(set)
            }
        }
    }

    fn handshake(&self, address: &HostAddress) -> Result<Handshake, ConnectionError> {
        let deadline = Instant::now() + self.timeout;
        let tcp_stream = self.connect(address, deadline)?;
        let stream = DeadlineStream::new(tcp_stream, deadline);

        let failure: Arc<Mutex<Option<VerifyFailure>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&failure);

        let mut config = self.connector.configure()?;
        config.set_verify_callback(SslVerifyMode::PEER, move |preverify_ok, ctx| {
            if !preverify_ok {
                if let (Some(cert), Ok(mut stored)) = (ctx.current_cert(), slot.lock()) {
                    if stored.is_none() {
                        *stored = Some(VerifyFailure {
                            certificate: cert.to_owned(),
                            reason: ctx.error().error_string().to_string(),
                        });
                    }
                }
            }
            preverify_ok
        });

        match config.connect(&address.host, stream) {
            Ok(stream) => {
                let chains = verified_chains(&stream);
                drop(stream);
                Ok(Handshake::Verified(chains))
            }
            Err(HandshakeError::SetupFailure(e)) => Err(e.into()),
            Err(HandshakeError::WouldBlock(_)) => Err(ConnectionError::Timeout {
                address: address.to_string(),
            }),
            Err(HandshakeError::Failure(mid)) => {
                let captured = failure.lock().ok().and_then(|mut slot| slot.take());
                if let Some(VerifyFailure {
                    certificate,
                    reason,
                }) = captured
                {
                    return Ok(Handshake::Rejected {
                        certificate,
                        reason: format!("certificate verify failed: {}", reason),
                    });
                }

                let verify_result = mid.ssl().verify_result();
                if verify_result != X509VerifyResult::OK {
                    if let Some(certificate) = mid.ssl().peer_certificate() {
                        return Ok(Handshake::Rejected {
                            certificate,
                            reason: format!(
                                "certificate verify failed: {}",
                                verify_result.error_string()
                            ),
                        });
                    }
                }

                if let Some(io_error) = mid.error().io_error() {
                    if is_timeout(io_error) {
                        return Err(ConnectionError::Timeout {
                            address: address.to_string(),
                        });
                    }
                }
                Err(ConnectionError::HandshakeFailed {
                    address: address.to_string(),
                    details: mid.error().to_string(),
                })
            }
        }
    }

    /// Opens a TCP connection to the first resolved address that accepts
    /// before `deadline`.
    fn connect(
        &self,
        address: &HostAddress,
        deadline: Instant,
    ) -> Result<TcpStream, ConnectionError> {
        let candidates: Vec<SocketAddr> = (address.host.as_str(), address.port)
            .to_socket_addrs()
            .map_err(|source| ConnectionError::DnsResolution {
                hostname: address.host.clone(),
                source,
            })?
            .collect();

        let mut last_error = None;
        for socket_addr in candidates {
            let left = match time_left(deadline) {
                Ok(left) => left,
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            };
            match TcpStream::connect_timeout(&socket_addr, left) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("connect to {} failed: {}", socket_addr, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if is_timeout(&e) => Err(ConnectionError::Timeout {
                address: address.to_string(),
            }),
            Some(source) => Err(ConnectionError::ConnectionFailed {
                address: address.to_string(),
                source,
            }),
            None => Err(ConnectionError::DnsResolution {
                hostname: address.host.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no addresses found",
                ),
            }),
        }
    }
}

/// TCP stream whose reads and writes share one deadline.
///
/// The socket timeout is shrunk to the time left before every call, so a
/// peer trickling bytes cannot stretch the handshake past the deadline.
#[derive(Debug)]
struct DeadlineStream {
    inner: TcpStream,
    deadline: Instant,
}

impl DeadlineStream {
    fn new(inner: TcpStream, deadline: Instant) -> Self {
        DeadlineStream { inner, deadline }
    }
}

impl Read for DeadlineStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.set_read_timeout(Some(time_left(self.deadline)?))?;
        self.inner.read(buf).map_err(timed_out)
    }
}

impl Write for DeadlineStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.set_write_timeout(Some(time_left(self.deadline)?))?;
        self.inner.write(buf).map_err(timed_out)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Time remaining before `deadline`, or a `TimedOut` error once it passed.
fn time_left(deadline: Instant) -> io::Result<Duration> {
    match deadline.checked_duration_since(Instant::now()) {
        Some(left) if !left.is_zero() => Ok(left),
        _ => Err(io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded")),
    }
}

// Unix reports an expired socket timeout as WouldBlock, which OpenSSL
// would treat as a retryable non-blocking read.
fn timed_out(e: io::Error) -> io::Error {
    if e.kind() == io::ErrorKind::WouldBlock {
        io::Error::new(io::ErrorKind::TimedOut, e)
    } else {
        e
    }
}

/// Copies the verified chain out of an established session.
///
/// OpenSSL reports a single verified chain; when it is unavailable the
/// peer's presented chain is used instead.
fn verified_chains(stream: &SslStream<DeadlineStream>) -> Vec<Vec<X509>> {
    let ssl = stream.ssl();
    let chain = ssl.verified_chain().or_else(|| ssl.peer_cert_chain());
    match chain {
        Some(stack) => vec![stack.iter().map(X509Ref::to_owned).collect()],
        None => ssl.peer_certificate().map(|leaf| vec![vec![leaf]]).unwrap_or_default(),
    }
}

/// Classifies every certificate across `chains`, keeping the first record
/// for each signature.
pub fn certificates_from_chains(
    host_label: &str,
    chains: &[Vec<X509>],
    warn_threshold: DateTime<Utc>,
    now: DateTime<Utc>,
    policies: &SunsetPolicyTable,
) -> Result<CertificateSet, ConnectionError> {
    let mut set = CertificateSet::new();
    for chain in chains {
        for cert in chain {
            if set.contains(cert.signature().as_slice()) {
                continue;
            }
            let facts = read_facts(host_label, cert)?;
            let record = classify(host_label, warn_threshold, now, &facts, policies);
            set.insert(facts.signature, record);
        }
    }
    Ok(set)
}

fn read_facts(host_label: &str, cert: &X509Ref) -> Result<CertificateFacts, ConnectionError> {
    CertificateFacts::from_x509(cert).map_err(|e| ConnectionError::CertificateUnreadable {
        address: host_label.to_string(),
        reason: e.to_string(),
    })
}

/// A host label resolved into a host name (or literal) and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    /// Host name or IP literal, without brackets
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for HostAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Splits a host label into host and port, defaulting the port to 443.
///
/// Accepts `host`, `host:port`, `[v6]:port`, bare IPv6 literals and
/// `https://` URLs.
pub fn normalize_address(host_label: &str) -> Result<HostAddress, ConnectionError> {
    let label = host_label.trim();
    let invalid = |reason: &str| ConnectionError::InvalidInput {
        host: host_label.to_string(),
        reason: reason.to_string(),
    };

    if label.is_empty() {
        return Err(invalid("empty host"));
    }

    if label.contains("://") {
        let url = Url::parse(label).map_err(|e| invalid(&e.to_string()))?;
        let host = url.host_str().ok_or_else(|| invalid("URL has no host"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url.port_or_known_default().unwrap_or(DEFAULT_PORT);
        return Ok(HostAddress {
            host: host.to_string(),
            port,
        });
    }

    if let Ok(ip) = label.parse::<Ipv6Addr>() {
        return Ok(HostAddress {
            host: IpAddr::V6(ip).to_string(),
            port: DEFAULT_PORT,
        });
    }

    let (host, port) = match label.rsplit_once(':') {
        None => (label, DEFAULT_PORT),
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid(&format!("invalid port '{}'", port)))?;
            (host.trim_start_matches('[').trim_end_matches(']'), port)
        }
    };
    if host.is_empty() {
        return Err(invalid("empty host"));
    }

    Ok(HostAddress {
        host: host.to_string(),
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(subject: &str) -> CertificateRecord {
        CertificateRecord {
            host_label: "example.com:443".to_string(),
            subject_common_name: subject.to_string(),
            issuer_common_name: "Example CA".to_string(),
            signature_algorithm_label: "SHA256-RSA".to_string(),
            not_after: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            expires_in_hours: 1000,
            expires_in_text: "41 days".to_string(),
            expires_soon: false,
            sunset_policy: None,
            error_text: None,
        }
    }

    #[test]
    fn test_normalize_appends_default_port() {
        let address = normalize_address("example.com").unwrap();
        assert_eq!(address.host, "example.com");
        assert_eq!(address.port, 443);
        assert_eq!(address.to_string(), "example.com:443");
    }

    #[test]
    fn test_normalize_keeps_explicit_port() {
        let address = normalize_address("expired.example.com:8443").unwrap();
        assert_eq!(address.host, "expired.example.com");
        assert_eq!(address.port, 8443);
    }

    #[test]
    fn test_normalize_ipv6() {
        let bare = normalize_address("::1").unwrap();
        assert_eq!(bare.host, "::1");
        assert_eq!(bare.port, 443);
        assert_eq!(bare.to_string(), "[::1]:443");

        let bracketed = normalize_address("[2001:db8::1]:8443").unwrap();
        assert_eq!(bracketed.host, "2001:db8::1");
        assert_eq!(bracketed.port, 8443);
    }

    #[test]
    fn test_normalize_url() {
        let address = normalize_address("https://secure.example.com:9443/path").unwrap();
        assert_eq!(address.to_string(), "secure.example.com:9443");

        let address = normalize_address("https://example.com").unwrap();
        assert_eq!(address.port, 443);
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        assert!(matches!(
            normalize_address("example.com:https"),
            Err(ConnectionError::InvalidInput { .. })
        ));
        assert!(normalize_address("").is_err());
        assert!(normalize_address(":443").is_err());
        assert!(normalize_address("example.com:70000").is_err());
    }

    #[test]
    fn test_certificate_set_first_wins() {
        let mut set = CertificateSet::new();
        assert!(set.insert(vec![1, 2], record("leaf")));
        assert!(set.insert(vec![3, 4], record("intermediate")));
        assert!(!set.insert(vec![1, 2], record("duplicate")));

        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&[1, 2]).unwrap().subject_common_name, "leaf");
        let subjects: Vec<_> = set
            .records()
            .map(|r| r.subject_common_name.as_str())
            .collect();
        assert_eq!(subjects, vec!["leaf", "intermediate"]);
    }

    #[test]
    fn test_deadline_stream_bounds_slow_reads() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut peer, _)) = listener.accept() {
                for _ in 0..30 {
                    if peer.write_all(&[0]).is_err() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        });

        let start = Instant::now();
        let tcp = TcpStream::connect(address).unwrap();
        let mut stream = DeadlineStream::new(tcp, start + Duration::from_millis(500));
        let mut received = 0;
        let mut buf = [0u8; 16];
        let error = loop {
            match stream.read(&mut buf) {
                Ok(n) => received += n,
                Err(e) => break e,
            }
        };

        assert_eq!(error.kind(), io::ErrorKind::TimedOut);
        assert!(received > 0);
        assert!(start.elapsed() < Duration::from_millis(1500), "{:?}", start.elapsed());
    }

    #[test]
    fn test_time_left_after_deadline() {
        let past = Instant::now() - Duration::from_millis(1);
        let error = time_left(past).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::TimedOut);
        assert!(time_left(Instant::now() + Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_default_options() {
        let options = InspectorOptions::default();
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert!(options.extra_roots.is_empty());
    }
}
