//! Wire and report types for VRP negotiation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use annex_types::{AlignmentStatus, TransferScope};

/// Errors produced while building VRP structures.
#[derive(Debug, Error)]
pub enum VrpError {
    /// The system clock reports a time before the Unix epoch.
    #[error("system clock is invalid")]
    SystemClockInvalid,
}

/// A snapshot of an entity's policy root for comparison.
///
/// Carries both the raw lists (needed for the set-based comparison) and
/// order-independent hashes (cheap equality and audit trails).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnchorSnapshot {
    /// The entity's operating principles.
    pub principles: Vec<String>,
    /// Actions the entity prohibits.
    pub prohibited_actions: Vec<String>,
    /// Hash of the sorted principles list.
    pub principles_hash: String,
    /// Hash of the sorted prohibited-actions list.
    pub prohibited_actions_hash: String,
    /// Unix timestamp of when this snapshot was generated.
    pub timestamp: u64,
}

impl AnchorSnapshot {
    /// Builds a snapshot, hashing each list in sorted order so two anchors
    /// with the same contents compare equal regardless of declaration
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`VrpError::SystemClockInvalid`] if the clock predates the
    /// Unix epoch.
    pub fn new(principles: &[String], prohibited_actions: &[String]) -> Result<Self, VrpError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| VrpError::SystemClockInvalid)?
            .as_secs();

        Ok(Self {
            principles: principles.to_vec(),
            prohibited_actions: prohibited_actions.to_vec(),
            principles_hash: hash_sorted(principles),
            prohibited_actions_hash: hash_sorted(prohibited_actions),
            timestamp,
        })
    }
}

fn hash_sorted(items: &[String]) -> String {
    let mut sorted: Vec<&str> = items.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for item in sorted {
        hasher.update(item.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Required and offered capabilities for an interaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CapabilityContract {
    /// Capabilities this entity requires from the counterparty.
    pub required_capabilities: Vec<String>,
    /// Capabilities this entity offers to the counterparty.
    pub offered_capabilities: Vec<String>,
}

/// The payload a peer submits during a federation handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FederationHandshake {
    /// The sender's anchor snapshot.
    pub anchor_snapshot: AnchorSnapshot,
    /// The sender's capability contract.
    pub capability_contract: CapabilityContract,
    /// The most permissive transfer scope the sender offers.
    #[serde(default = "default_offered_scope")]
    pub offered_transfer_scope: TransferScope,
}

fn default_offered_scope() -> TransferScope {
    TransferScope::ReflectionSummariesOnly
}

/// The outcome of a VRP comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    /// The computed alignment status.
    pub alignment_status: AlignmentStatus,
    /// The negotiated transfer scope.
    pub transfer_scope: TransferScope,
    /// Fraction of local principles covered by the remote (1.0 when the
    /// local list is empty).
    pub alignment_score: f32,
    /// Human-readable notes on how the outcome was reached.
    pub negotiation_notes: Vec<String>,
}
