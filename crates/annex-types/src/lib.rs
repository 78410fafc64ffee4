//! Shared types, error kinds, and constants for the Annex platform.
//!
//! This crate provides the foundational types used across all Annex crates:
//! participant role codes, capability flags, federation alignment and
//! transfer-scope enums, the server policy structure, and the public
//! error-kind table surfaced at the admission boundary.
//!
//! No crate in the workspace depends on anything *except* `annex-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

use serde::{Deserialize, Serialize};

mod error;
mod policy;

pub use error::{ErrorBody, ErrorKind};
pub use policy::{RateLimitConfig, ServerPolicy};

/// Fixed depth of the per-server commitment Merkle tree (capacity 2^20).
pub const MERKLE_DEPTH: usize = 20;

/// Participant role codes as defined by the VRP identity model.
///
/// The role code is baked into the identity commitment:
/// `commitment = Poseidon(sk, roleCode, nodeId)`. It is declared by the
/// submitter at registration and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoleCode {
    /// A human participant.
    Human = 1,
    /// An AI agent participant.
    AiAgent = 2,
    /// A collective (group identity).
    Collective = 3,
    /// A federation bridge.
    Bridge = 4,
    /// A platform service.
    Service = 5,
}

impl RoleCode {
    /// Returns the numeric code for this role.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Attempts to convert a numeric code to a `RoleCode`.
    ///
    /// Returns `None` if the code does not correspond to a known role.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Human),
            2 => Some(Self::AiAgent),
            3 => Some(Self::Collective),
            4 => Some(Self::Bridge),
            5 => Some(Self::Service),
            _ => None,
        }
    }

    /// Returns the participant-type label stored in `platform_identities`.
    ///
    /// This is the fixed `role_code → participant_type` table; there is no
    /// other mapping between the two.
    pub fn label(self) -> &'static str {
        match self {
            Self::Human => "HUMAN",
            Self::AiAgent => "AI_AGENT",
            Self::Collective => "COLLECTIVE",
            Self::Bridge => "BRIDGE",
            Self::Service => "SERVICE",
        }
    }

    /// Inverse of [`RoleCode::label`].
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "HUMAN" => Some(Self::Human),
            "AI_AGENT" => Some(Self::AiAgent),
            "COLLECTIVE" => Some(Self::Collective),
            "BRIDGE" => Some(Self::Bridge),
            "SERVICE" => Some(Self::Service),
            _ => None,
        }
    }
}

/// Capability flags for a platform identity.
///
/// A fixed record of booleans, not an open dictionary. The first identity
/// registered on a server is auto-promoted to voice/moderate/invite/federate;
/// `can_bridge` is never granted implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Can join voice channels and publish audio.
    pub can_voice: bool,
    /// Can perform moderation actions (policy edits, capability edits).
    pub can_moderate: bool,
    /// Can generate invite links.
    pub can_invite: bool,
    /// Can initiate and accept federation writes.
    pub can_federate: bool,
    /// Can operate as a bridge.
    pub can_bridge: bool,
}

impl Capabilities {
    /// The capability set granted to the first identity on a server.
    pub fn founder() -> Self {
        Self {
            can_voice: true,
            can_moderate: true,
            can_invite: true,
            can_federate: true,
            can_bridge: false,
        }
    }
}

/// VRP alignment status produced by anchor comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignmentStatus {
    /// Local principles are covered by the remote and nothing prohibited
    /// is offered.
    #[serde(alias = "ALIGNED")]
    Aligned,
    /// Partial principle overlap with no prohibition violated.
    #[serde(alias = "PARTIAL")]
    Partial,
    /// Direct opposition; all onward accept paths are disabled.
    #[serde(alias = "CONFLICT")]
    Conflict,
}

impl AlignmentStatus {
    /// Canonical string stored in `federation_agreements.alignment_status`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aligned => "ALIGNED",
            Self::Partial => "PARTIAL",
            Self::Conflict => "CONFLICT",
        }
    }

    /// Inverse of [`AlignmentStatus::as_str`].
    pub fn from_str_label(s: &str) -> Option<Self> {
        match s {
            "ALIGNED" => Some(Self::Aligned),
            "PARTIAL" => Some(Self::Partial),
            "CONFLICT" => Some(Self::Conflict),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// VRP transfer scope: what knowledge may cross a federation edge.
///
/// The derive order gives the total order
/// `NoTransfer < ReflectionSummariesOnly < FullKnowledgeBundle`, so scope
/// negotiation is `min(local, remote)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransferScope {
    /// No data crosses the boundary.
    #[serde(alias = "NO_TRANSFER")]
    NoTransfer,
    /// Only compressed summaries without raw reasoning chains.
    #[serde(alias = "REFLECTION_SUMMARIES_ONLY")]
    ReflectionSummariesOnly,
    /// Complete knowledge bundles with full context.
    #[serde(alias = "FULL_KNOWLEDGE_BUNDLE")]
    FullKnowledgeBundle,
}

impl TransferScope {
    /// Canonical string stored in `federation_agreements.transfer_scope`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoTransfer => "NO_TRANSFER",
            Self::ReflectionSummariesOnly => "REFLECTION_SUMMARIES_ONLY",
            Self::FullKnowledgeBundle => "FULL_KNOWLEDGE_BUNDLE",
        }
    }

    /// Inverse of [`TransferScope::as_str`].
    pub fn from_str_label(s: &str) -> Option<Self> {
        match s {
            "NO_TRANSFER" => Some(Self::NoTransfer),
            "REFLECTION_SUMMARIES_ONLY" => Some(Self::ReflectionSummariesOnly),
            "FULL_KNOWLEDGE_BUNDLE" => Some(Self::FullKnowledgeBundle),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransferScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
