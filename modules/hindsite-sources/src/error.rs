use hindsite_common::ArchiveSource;
use thiserror::Error;

/// Error kind without the payload. Drives retry, fallback, and circuit
/// breaker accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceErrorKind {
    Retriable,
    Permanent,
    CircuitOpen,
    NotCaptured,
    Cancelled,
}

impl SourceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceErrorKind::Retriable => "retriable",
            SourceErrorKind::Permanent => "permanent",
            SourceErrorKind::CircuitOpen => "circuit_open",
            SourceErrorKind::NotCaptured => "not_captured",
            SourceErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Classified error from an archive source. Raw reqwest errors never leave
/// the strategy boundary.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Network failures, 5xx, 429, and the source-specific 522 timeout.
    #[error("retriable source error: {message}")]
    Retriable { message: String, status: Option<u16> },

    /// 4xx (other than 429), protocol errors, malformed responses.
    #[error("permanent source error: {message}")]
    Permanent { message: String, status: Option<u16> },

    /// Blocked by the source's circuit breaker without invoking the call.
    #[error("circuit open for {archive_source}")]
    CircuitOpen { archive_source: ArchiveSource },

    /// The archive reports the capture as missing.
    #[error("capture not present in archive")]
    NotCaptured,

    /// Cooperative cancellation observed at a suspension point.
    #[error("cancelled")]
    Cancelled,
}

impl SourceError {
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            SourceError::Retriable { .. } => SourceErrorKind::Retriable,
            SourceError::Permanent { .. } => SourceErrorKind::Permanent,
            SourceError::CircuitOpen { .. } => SourceErrorKind::CircuitOpen,
            SourceError::NotCaptured => SourceErrorKind::NotCaptured,
            SourceError::Cancelled => SourceErrorKind::Cancelled,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, SourceError::Retriable { .. })
    }

    pub fn retriable(message: impl Into<String>) -> Self {
        SourceError::Retriable {
            message: message.into(),
            status: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        SourceError::Permanent {
            message: message.into(),
            status: None,
        }
    }

    /// Classify an HTTP status at the source boundary. 429 and everything
    /// above 499 (including Cloudflare's 522) retries; other 4xx is final.
    pub fn from_status(status: u16, context: &str) -> Self {
        if status == 429 || status >= 500 {
            SourceError::Retriable {
                message: format!("{context}: HTTP {status}"),
                status: Some(status),
            }
        } else {
            SourceError::Permanent {
                message: format!("{context}: HTTP {status}"),
                status: Some(status),
            }
        }
    }

    /// Classify a transport-level error (timeouts, connect failures).
    pub fn from_transport(err: reqwest::Error, context: &str) -> Self {
        SourceError::Retriable {
            message: format!("{context}: {err}"),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(SourceError::from_status(500, "cdx").is_retriable());
        assert!(SourceError::from_status(522, "cdx").is_retriable());
        assert!(SourceError::from_status(429, "cdx").is_retriable());
        assert!(!SourceError::from_status(400, "cdx").is_retriable());
        assert!(!SourceError::from_status(404, "cdx").is_retriable());
    }
}
