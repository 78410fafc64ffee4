//! Public error-kind table surfaced at the admission boundary.
//!
//! Internal store and crypto errors are mapped to the nearest public kind
//! before they leave the core; the original message is preserved in a
//! structured log entry at the mapping site.

use serde::{Deserialize, Serialize};

/// Client-visible failure kinds.
///
/// Every error that crosses the admission boundary is one of these. The
/// serialised name is the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed hex, out-of-range field element, or unknown role code.
    InvalidInput,
    /// The Merkle tree is full (2^20 leaves).
    CapacityExceeded,
    /// The commitment is already registered.
    DuplicateCommitment,
    /// Verification against a root this server never produced.
    UnknownRoot,
    /// Claimed root/commitment do not equal the proof's public signals.
    PublicSignalMismatch,
    /// Proof deserialisation or pairing check failed.
    InvalidProof,
    /// The `(topic, nullifier)` pair was already consumed.
    NullifierReplay,
    /// Remote verifying key does not match the pinned instance key.
    UntrustedPeerKey,
    /// No active agreement permits the attempted federation transfer.
    FederationDenied,
    /// Federated identity freshness exceeded and re-verification failed.
    FederatedIdentityExpired,
    /// Admission budget exhausted.
    RateLimited,
    /// Store or connection pool unavailable.
    ServiceUnavailable,
    /// Operation exceeded its deadline.
    Timeout,
    /// The referenced entity does not exist.
    NotFound,
}

impl ErrorKind {
    /// Canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "InvalidInput",
            Self::CapacityExceeded => "CapacityExceeded",
            Self::DuplicateCommitment => "DuplicateCommitment",
            Self::UnknownRoot => "UnknownRoot",
            Self::PublicSignalMismatch => "PublicSignalMismatch",
            Self::InvalidProof => "InvalidProof",
            Self::NullifierReplay => "NullifierReplay",
            Self::UntrustedPeerKey => "UntrustedPeerKey",
            Self::FederationDenied => "FederationDenied",
            Self::FederatedIdentityExpired => "FederatedIdentityExpired",
            Self::RateLimited => "RateLimited",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::Timeout => "Timeout",
            Self::NotFound => "NotFound",
        }
    }

    /// Whether a client may usefully retry the same request.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServiceUnavailable | Self::Timeout
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform wire error shape: `{error, message, retry_after_seconds?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The public error kind.
    pub error: ErrorKind,
    /// Human-readable detail.
    pub message: String,
    /// Remaining admission window, present only for `RateLimited`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl ErrorBody {
    /// Builds a body with no retry hint.
    pub fn new(error: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    /// Builds a `RateLimited` body with the remaining-window hint.
    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self {
            error: ErrorKind::RateLimited,
            message: "rate limit exceeded".to_string(),
            retry_after_seconds: Some(retry_after_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_omits_retry_hint_when_absent() {
        let body = ErrorBody::new(ErrorKind::InvalidProof, "pairing check failed");
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"InvalidProof\""));
        assert!(!json.contains("retry_after_seconds"));
    }

    #[test]
    fn rate_limited_body_carries_hint() {
        let body = ErrorBody::rate_limited(42);
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"retry_after_seconds\":42"));
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::RateLimited.retryable());
        assert!(ErrorKind::ServiceUnavailable.retryable());
        assert!(ErrorKind::Timeout.retryable());
        assert!(!ErrorKind::NullifierReplay.retryable());
        assert!(!ErrorKind::InvalidProof.retryable());
    }
}
