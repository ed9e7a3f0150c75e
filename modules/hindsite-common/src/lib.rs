pub mod circuit;
pub mod config;
pub mod error;
pub mod policy;
pub mod telemetry;
pub mod types;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus};
pub use config::Config;
pub use error::HindsiteError;
pub use policy::*;
pub use types::*;

use sha2::{Digest, Sha256};

/// SHA-256 of canonicalized text, hex-encoded.
///
/// Canonicalization trims each line and drops empty lines so that whitespace
/// drift between two extractions of the same capture does not change the
/// digest.
pub fn content_digest(text: &str) -> String {
    let canonical: String = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of a serialized payload, hex-encoded. Used for dual-write intent
/// de-duplication and the analytical conflict policy.
pub fn payload_hash(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_ignores_whitespace_drift() {
        let a = content_digest("Hello world\n\n  second line  \n");
        let b = content_digest("Hello world\nsecond line");
        assert_eq!(a, b);
    }

    #[test]
    fn digest_distinguishes_content() {
        assert_ne!(content_digest("alpha"), content_digest("beta"));
    }
}
