//! Event domain, payload, and record types for the public event log.

use serde::{Deserialize, Serialize};

/// Observability event domains.
///
/// The five domains are part of the persisted schema contract even where
/// the identity core does not emit into all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventDomain {
    /// Identity operations: registrations, activations.
    #[serde(rename = "IDENTITY")]
    Identity,
    /// Presence graph changes (emitted by the presence plane).
    #[serde(rename = "PRESENCE")]
    Presence,
    /// Federation lifecycle: handshakes, attestations, expiries.
    #[serde(rename = "FEDERATION")]
    Federation,
    /// Agent lifecycle (emitted by the agent plane).
    #[serde(rename = "AGENT")]
    Agent,
    /// Moderation actions: policy and capability edits.
    #[serde(rename = "MODERATION")]
    Moderation,
}

impl EventDomain {
    /// Returns the canonical string label for this domain.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "IDENTITY",
            Self::Presence => "PRESENCE",
            Self::Federation => "FEDERATION",
            Self::Agent => "AGENT",
            Self::Moderation => "MODERATION",
        }
    }
}

impl std::fmt::Display for EventDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventDomain {
    type Err = ParseEventDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDENTITY" => Ok(Self::Identity),
            "PRESENCE" => Ok(Self::Presence),
            "FEDERATION" => Ok(Self::Federation),
            "AGENT" => Ok(Self::Agent),
            "MODERATION" => Ok(Self::Moderation),
            _ => Err(ParseEventDomainError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown event domain string.
#[derive(Debug, Clone)]
pub struct ParseEventDomainError(pub String);

impl std::fmt::Display for ParseEventDomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event domain: {}", self.0)
    }
}

impl std::error::Error for ParseEventDomainError {}

/// Structured event payloads emitted by the identity core.
///
/// Payloads are serialised to JSON and stored in the `payload_json` column
/// of `public_event_log`. Each variant corresponds to an `event_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    /// A new identity commitment was appended to the Merkle tree.
    IdentityRegistered {
        /// The hex-encoded commitment.
        commitment_hex: String,
        /// The declared role code.
        role_code: u8,
        /// The assigned Merkle leaf index.
        leaf_index: u64,
    },

    /// A membership proof was accepted and a pseudonym activated.
    IdentityActivated {
        /// The derived pseudonym identifier.
        pseudonym_id: String,
        /// The topic the pseudonym is scoped to.
        topic: String,
    },

    /// A federation handshake completed (first contact or re-handshake).
    FederationHandshake {
        /// The base URL of the remote instance.
        remote_url: String,
        /// The computed alignment status.
        alignment_status: String,
        /// The negotiated transfer scope.
        transfer_scope: String,
        /// Alignment of the retired agreement, if one existed.
        previous_status: Option<String>,
        /// The full validation report the agreement was written from.
        report: serde_json::Value,
    },

    /// A remote pseudonym attestation was verified and cached.
    FederatedIdentityAttested {
        /// The derived pseudonym identifier.
        pseudonym_id: String,
        /// The base URL of the attesting instance.
        remote_url: String,
        /// The VRP topic of the attestation.
        vrp_topic: String,
    },

    /// A stale federated identity failed re-verification and was removed.
    FederatedIdentityExpired {
        /// The pseudonym that expired.
        pseudonym_id: String,
        /// The base URL of the owning instance.
        remote_url: String,
    },

    /// The server policy was updated to a new immutable version.
    PolicyUpdated {
        /// The new policy version id.
        version_id: i64,
        /// The moderator who applied the update.
        moderator_pseudonym: String,
    },

    /// A platform identity's capability flags were changed.
    CapabilitiesUpdated {
        /// The moderator who performed the edit.
        moderator_pseudonym: String,
        /// The identity whose capabilities changed.
        target_pseudonym: String,
    },
}

impl EventPayload {
    /// Returns the canonical event type string for this payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::IdentityRegistered { .. } => "IDENTITY_REGISTERED",
            Self::IdentityActivated { .. } => "IDENTITY_ACTIVATED",
            Self::FederationHandshake { .. } => "FEDERATION_HANDSHAKE",
            Self::FederatedIdentityAttested { .. } => "FEDERATED_IDENTITY_ATTESTED",
            Self::FederatedIdentityExpired { .. } => "FEDERATED_IDENTITY_EXPIRED",
            Self::PolicyUpdated { .. } => "POLICY_UPDATED",
            Self::CapabilitiesUpdated { .. } => "CAPABILITIES_UPDATED",
        }
    }

    /// Returns the `entity_type` column value for this payload.
    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::IdentityRegistered { .. } | Self::IdentityActivated { .. } => "identity",
            Self::FederationHandshake { .. } => "agreement",
            Self::FederatedIdentityAttested { .. } | Self::FederatedIdentityExpired { .. } => {
                "federated_identity"
            }
            Self::PolicyUpdated { .. } => "policy",
            Self::CapabilitiesUpdated { .. } => "identity",
        }
    }

    /// Returns the domain for this payload.
    pub fn domain(&self) -> EventDomain {
        match self {
            Self::IdentityRegistered { .. } | Self::IdentityActivated { .. } => {
                EventDomain::Identity
            }
            Self::FederationHandshake { .. }
            | Self::FederatedIdentityAttested { .. }
            | Self::FederatedIdentityExpired { .. } => EventDomain::Federation,
            Self::PolicyUpdated { .. } | Self::CapabilitiesUpdated { .. } => {
                EventDomain::Moderation
            }
        }
    }
}

/// A single row from the `public_event_log` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicEvent {
    /// Auto-incremented row ID.
    pub id: i64,
    /// The server that owns this event.
    pub server_id: i64,
    /// The event domain (e.g., `IDENTITY`, `FEDERATION`).
    pub domain: String,
    /// The specific event type (e.g., `IDENTITY_REGISTERED`).
    pub event_type: String,
    /// The type of entity involved (e.g., `identity`, `agreement`).
    pub entity_type: String,
    /// The identifier of the entity involved.
    pub entity_id: String,
    /// Monotonically increasing sequence number within the server.
    pub seq: i64,
    /// The structured event payload as a JSON string.
    pub payload_json: String,
    /// ISO 8601 timestamp of when the event occurred.
    pub occurred_at: String,
}
