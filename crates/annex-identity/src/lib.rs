//! Identity plane for the Annex platform.
//!
//! Implements the cryptographic identity substrate: Poseidon(BN254)
//! commitments, the depth-20 append-only Merkle registry, Groth16
//! membership verification, topic-scoped nullifier/pseudonym derivation,
//! and the activation service that fuses them into transactional
//! operations.
//!
//! Every participant — human, AI agent, collective, bridge, or service —
//! generates a keypair in their own runtime and proves membership via
//! zero-knowledge proofs. No entity ever reveals its secret key; the
//! server only ever sees the commitment `Poseidon(sk, roleCode, nodeId)`
//! and topic-scoped pseudonyms derived from it.

use thiserror::Error;

pub mod activation;
pub mod commitment;
pub mod field;
pub mod merkle;
pub mod nullifier;
pub mod platform;
pub mod poseidon;
pub mod registry;
pub mod topic;
pub mod zk;

pub use activation::{activate_membership, record_activation, ActivationOutcome, MembershipClaim};
pub use annex_types::{Capabilities, RoleCode, MERKLE_DEPTH};
pub use commitment::generate_commitment;
pub use field::{fr_to_hex, parse_field_hex, parse_signal};
pub use merkle::MerkleTree;
pub use nullifier::{
    derive_nullifier_hex, derive_pseudonym_id, insert_nullifier, resolve_commitment_for_pseudonym,
    sha256_hex,
};
pub use platform::{
    get_platform_identity, update_capabilities, upsert_platform_identity, PlatformIdentity,
};
pub use registry::{
    get_path_for_commitment, register_identity, role_for_commitment, root_is_known, MerklePath,
    RegistrationResult,
};
pub use topic::validate_topic;

use annex_db::BusyClass;
use annex_types::ErrorKind;

/// Errors produced by the identity plane.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Malformed hex, out-of-range field element, or unknown role code.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The Merkle tree has reached its 2^20 capacity.
    #[error("merkle tree capacity exceeded")]
    CapacityExceeded,

    /// The commitment is already registered on this server.
    #[error("commitment '{0}' already registered")]
    DuplicateCommitment(String),

    /// Verification was attempted against a root this server never produced.
    #[error("unknown merkle root: {0}")]
    UnknownRoot(String),

    /// Claimed root/commitment do not equal the proof's public signals.
    #[error("public signal mismatch: {0}")]
    PublicSignalMismatch(String),

    /// Proof deserialisation or pairing check failed.
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// The `(topic, nullifier)` pair has already been consumed.
    #[error("nullifier already used for topic '{0}'")]
    NullifierReplay(String),

    /// The referenced commitment or identity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The persisted leaf set does not reproduce the stored active root.
    #[error("restored root {computed} does not match stored active root {stored}")]
    RootMismatch {
        /// Root recomputed from the leaf log.
        computed: String,
        /// Active root recorded in the store.
        stored: String,
    },

    /// Poseidon parameter or hashing failure.
    #[error("poseidon error: {0}")]
    Poseidon(String),

    /// An underlying database operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Event log append failed.
    #[error("event log error: {0}")]
    Observe(#[from] annex_observe::ObserveError),
}

impl BusyClass for IdentityError {
    fn is_busy(&self) -> bool {
        matches!(self, Self::Database(e) if e.is_busy())
    }
}

impl IdentityError {
    /// Maps this error to the public kind surfaced at the admission
    /// boundary. Internal store/crypto details stay in the log.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::CapacityExceeded => ErrorKind::CapacityExceeded,
            Self::DuplicateCommitment(_) => ErrorKind::DuplicateCommitment,
            Self::UnknownRoot(_) => ErrorKind::UnknownRoot,
            Self::PublicSignalMismatch(_) => ErrorKind::PublicSignalMismatch,
            Self::InvalidProof(_) => ErrorKind::InvalidProof,
            Self::NullifierReplay(_) => ErrorKind::NullifierReplay,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RootMismatch { .. } | Self::Poseidon(_) | Self::Database(_) | Self::Observe(_) => {
                ErrorKind::ServiceUnavailable
            }
        }
    }
}
