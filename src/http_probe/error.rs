use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A measured segment of the request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Dns,
    TcpConnect,
    TlsHandshake,
    ServerProcessing,
    ContentTransfer,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Dns => "dns",
            Phase::TcpConnect => "tcp_connect",
            Phase::TlsHandshake => "tls_handshake",
            Phase::ServerProcessing => "server_processing",
            Phase::ContentTransfer => "content_transfer",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single probe failed. Terminal for that probe only.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("dns resolution of {host} failed")]
    Resolution {
        host: String,
        #[source]
        source: BoxError,
    },

    #[error("tcp connect to {addr} failed")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tls handshake with {host} failed")]
    Handshake {
        host: String,
        #[source]
        source: native_tls::Error,
    },

    #[error("writing request failed")]
    RequestWrite(#[source] std::io::Error),

    #[error("reading response head failed")]
    ResponseRead(#[source] BoxError),

    #[error("reading response body failed")]
    BodyRead(#[source] BoxError),

    #[error("{phase} timed out after {}ms", .after.as_millis())]
    Timeout { phase: Phase, after: Duration },

    #[error("probe task ended without reporting a result")]
    Aborted,
}

impl ProbeError {
    /// The phase the probe was in when it failed, if it got that far.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ProbeError::InvalidUrl { .. } | ProbeError::Aborted => None,
            ProbeError::Resolution { .. } => Some(Phase::Dns),
            ProbeError::Connect { .. } => Some(Phase::TcpConnect),
            ProbeError::Handshake { .. } => Some(Phase::TlsHandshake),
            ProbeError::RequestWrite(_) | ProbeError::ResponseRead(_) => {
                Some(Phase::ServerProcessing)
            }
            ProbeError::BodyRead(_) => Some(Phase::ContentTransfer),
            ProbeError::Timeout { phase, .. } => Some(*phase),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_mapping() {
        let err = ProbeError::Resolution {
            host: "nope.invalid".to_string(),
            source: "no such host".into(),
        };
        assert_eq!(err.phase(), Some(Phase::Dns));

        let err = ProbeError::Timeout {
            phase: Phase::ContentTransfer,
            after: Duration::from_millis(250),
        };
        assert_eq!(err.phase(), Some(Phase::ContentTransfer));
        assert_eq!(err.to_string(), "content_transfer timed out after 250ms");

        assert_eq!(ProbeError::Aborted.phase(), None);
    }
}
