//! Federation error type and its public-kind mapping.

use annex_db::BusyClass;
use annex_identity::IdentityError;
use annex_types::ErrorKind;
use thiserror::Error;

/// Errors produced by the federation plane.
#[derive(Debug, Error)]
pub enum FederationError {
    /// The referenced remote instance is not registered.
    #[error("unknown remote instance: {0}")]
    UnknownInstance(String),

    /// No active agreement permits the attempted transfer.
    #[error("federation transfer denied: {0}")]
    Denied(String),

    /// The stored verifying key does not match the pinned fingerprint.
    #[error("remote verifying key does not match pinned instance key")]
    UntrustedPeerKey,

    /// A re-handshake arrived inside the anti-flap window.
    #[error("re-handshake throttled, retry in {retry_after_seconds}s")]
    HandshakeThrottled {
        /// Remaining seconds of the cadence window.
        retry_after_seconds: u64,
    },

    /// A federated identity went stale and re-verification failed.
    #[error("federated identity expired: {0}")]
    IdentityExpired(String),

    /// An identity-plane operation failed (proof, derivation, signals).
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Anchor construction failed.
    #[error(transparent)]
    Vrp(#[from] annex_vrp::VrpError),

    /// An underlying database operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Event log append failed.
    #[error("event log error: {0}")]
    Observe(#[from] annex_observe::ObserveError),

    /// An outbound peer request failed.
    #[error("peer request failed: {0}")]
    Peer(#[from] reqwest::Error),
}

impl BusyClass for FederationError {
    fn is_busy(&self) -> bool {
        match self {
            Self::Database(e) => e.is_busy(),
            Self::Identity(e) => e.is_busy(),
            _ => false,
        }
    }
}

impl FederationError {
    /// Maps this error to the public kind surfaced at the admission
    /// boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownInstance(_) => ErrorKind::NotFound,
            Self::Denied(_) => ErrorKind::FederationDenied,
            Self::UntrustedPeerKey => ErrorKind::UntrustedPeerKey,
            Self::HandshakeThrottled { .. } => ErrorKind::RateLimited,
            Self::IdentityExpired(_) => ErrorKind::FederatedIdentityExpired,
            Self::Identity(err) => err.kind(),
            Self::Vrp(_) | Self::Database(_) | Self::Observe(_) | Self::Peer(_) => {
                ErrorKind::ServiceUnavailable
            }
        }
    }
}
