//! Centralized error types for the transport layer
//!
//! All transport errors are represented by the `TransportError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, TransportError>`.
//!
//! Every variant is terminal for the affected connection: this layer never
//! retries or reconnects. Reconnection policy belongs to the upstream
//! protocol layer.

use std::fmt;

use crate::device::{AppHandle, DeviceId, TransportKind};

/// Handshake stage that failed while bringing up a secure cloud connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// Trust anchor could not be parsed or installed
    CertificateInstall,
    /// TLS client handshake failed
    Tls,
    /// WebSocket (or other session) upgrade failed
    Upgrade,
}

impl fmt::Display for HandshakeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CertificateInstall => write!(f, "certificate install"),
            Self::Tls => write!(f, "TLS handshake"),
            Self::Upgrade => write!(f, "protocol upgrade"),
        }
    }
}

/// All transport-layer errors
#[derive(Debug)]
pub enum TransportError {
    // === Connection establishment ===
    /// Host/port resolution failed (DNS error, empty result, or timeout)
    Resolution { endpoint: String, detail: String },
    /// Underlying stream could not be opened
    Connect {
        endpoint: String,
        source: std::io::Error,
    },
    /// A handshake stage failed (cert install, TLS, or protocol upgrade)
    Handshake {
        endpoint: String,
        stage: HandshakeStage,
        detail: String,
    },

    // === Live connection I/O ===
    /// Asynchronous read failed or the peer closed the stream
    Read { detail: String },
    /// Write from the writer loop failed
    Write { detail: String },

    // === Discovery ===
    /// Device scan failed for a transport medium
    Discovery {
        kind: TransportKind,
        detail: String,
    },

    // === Controller routing ===
    /// No adapter owns the device's transport kind, or the device is unknown
    UnknownDevice { device: DeviceId },
    /// No live connection exists for the (device, app handle) pair
    NoSuchConnection {
        device: DeviceId,
        app_handle: AppHandle,
    },
    /// A connection (live or pending) already exists for the pair
    DuplicateConnection {
        device: DeviceId,
        app_handle: AppHandle,
    },

    // === Configuration ===
    /// Invalid or missing configuration value
    Config { field: &'static str, reason: String },
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolution { endpoint, detail } => {
                write!(f, "Cannot resolve {}: {}", endpoint, detail)
            }
            Self::Connect { endpoint, .. } => write!(f, "Cannot connect to {}", endpoint),
            Self::Handshake {
                endpoint,
                stage,
                detail,
            } => write!(f, "{} failed with {}: {}", stage, endpoint, detail),
            Self::Read { detail } => write!(f, "Read failed: {}", detail),
            Self::Write { detail } => write!(f, "Write failed: {}", detail),
            Self::Discovery { kind, detail } => {
                write!(f, "Device scan failed on {}: {}", kind, detail)
            }
            Self::UnknownDevice { device } => write!(f, "Unknown device: {}", device),
            Self::NoSuchConnection { device, app_handle } => {
                write!(f, "No connection for {} app {}", device, app_handle)
            }
            Self::DuplicateConnection { device, app_handle } => {
                write!(
                    f,
                    "Connection already exists for {} app {}",
                    device, app_handle
                )
            }
            Self::Config { field, reason } => write!(f, "Invalid {}: {}", field, reason),
        }
    }
}

/// Alias for Result with TransportError
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_resolution() {
        let err = TransportError::Resolution {
            endpoint: "nonexistent.invalid:80".to_string(),
            detail: "lookup failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot resolve nonexistent.invalid:80: lookup failed"
        );
    }

    #[test]
    fn test_display_handshake_stage() {
        let err = TransportError::Handshake {
            endpoint: "cloud.example:443".to_string(),
            stage: HandshakeStage::Tls,
            detail: "bad certificate".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "TLS handshake failed with cloud.example:443: bad certificate"
        );
    }

    #[test]
    fn test_connect_source_is_preserved() {
        let err = TransportError::Connect {
            endpoint: "10.0.0.1:2020".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
