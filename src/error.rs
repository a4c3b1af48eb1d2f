//! Error types for chain inspection.
//!
//! A [`ConnectionError`] means no certificate could be obtained from a host.
//! Certificate validation failures are not errors at this level: the
//! inspector turns them into a [`CertificateRecord`](crate::CertificateRecord)
//! carrying the failure text instead.

use std::fmt;
use std::io;

/// Error returned when a host yields no certificate at all.
#[derive(Debug)]
pub enum ConnectionError {
    /// DNS resolution failed for the given hostname
    DnsResolution {
        /// The hostname that failed to resolve
        hostname: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TCP connection failed to every resolved address
    ConnectionFailed {
        /// The address (host:port) that connection failed to
        address: String,
        /// The last underlying I/O error
        source: io::Error,
    },

    /// Connect or handshake did not finish within the per-host timeout
    Timeout {
        /// The address (host:port) that timed out
        address: String,
    },

    /// TLS handshake failed without exposing a certificate
    HandshakeFailed {
        /// The address (host:port) of the failed handshake
        address: String,
        /// Details about why the handshake failed
        details: String,
    },

    /// A certificate was received but its fields could not be read
    CertificateUnreadable {
        /// The address (host:port) that served the certificate
        address: String,
        /// Description of what went wrong
        reason: String,
    },

    /// The host label could not be turned into an address
    InvalidInput {
        /// The offending host label
        host: String,
        /// Why it was invalid
        reason: String,
    },

    /// OpenSSL error while setting up the connection
    OpenSSLError {
        /// The underlying OpenSSL error
        details: String,
    },
}

impl ConnectionError {
    /// The host or address the error refers to, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::DnsResolution { hostname, .. } => Some(hostname),
            Self::ConnectionFailed { address, .. }
            | Self::Timeout { address }
            | Self::HandshakeFailed { address, .. }
            | Self::CertificateUnreadable { address, .. } => Some(address),
            Self::InvalidInput { host, .. } => Some(host),
            Self::OpenSSLError { .. } => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsResolution { hostname, source } => {
                write!(f, "failed to resolve hostname {}: {}", hostname, source)
            }
            Self::ConnectionFailed { address, source } => {
                write!(f, "tcp dial {} failed: {}", address, source)
            }
            Self::Timeout { address } => {
                write!(f, "tcp dial {} timed out", address)
            }
            Self::HandshakeFailed { address, details } => {
                write!(f, "TLS handshake with {} failed: {}", address, details)
            }
            Self::CertificateUnreadable { address, reason } => {
                write!(f, "unreadable certificate from {}: {}", address, reason)
            }
            Self::InvalidInput { host, reason } => {
                write!(f, "invalid host '{}': {}", host, reason)
            }
            Self::OpenSSLError { details } => {
                write!(f, "OpenSSL error: {}", details)
            }
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DnsResolution { source, .. } => Some(source),
            Self::ConnectionFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<openssl::error::ErrorStack> for ConnectionError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSLError {
            details: e.to_string(),
        }
    }
}

/// True when an I/O error is the result of a socket timeout.
///
/// Blocking sockets with a read timeout report `WouldBlock` on Unix and
/// `TimedOut` on Windows.
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let err = ConnectionError::InvalidInput {
            host: "example.com:https".to_string(),
            reason: "invalid port".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid host 'example.com:https': invalid port"
        );
    }

    #[test]
    fn test_error_source() {
        let err = ConnectionError::ConnectionFailed {
            address: "127.0.0.1:1".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.source().is_some());
        assert_eq!(err.target(), Some("127.0.0.1:1"));

        let err = ConnectionError::Timeout {
            address: "10.0.0.1:443".to_string(),
        };
        assert!(err.source().is_none());
    }

    #[test]
    fn test_is_timeout() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_timeout(&io::Error::from(
            io::ErrorKind::ConnectionRefused
        )));
    }
}
