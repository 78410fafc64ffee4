//! Server policy configuration.

use serde::{Deserialize, Serialize};

use crate::TransferScope;

/// Operational policy of an Annex server.
///
/// Policies are immutable snapshots: every update appends a new row to
/// `server_policy_versions` and readers always load the latest version.
/// The struct is serialised to JSON for storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerPolicy {
    /// Minimum VRP alignment score required for agents to join.
    pub agent_min_alignment_score: f32,
    /// Capabilities required of agents at handshake time.
    pub agent_required_capabilities: Vec<String>,
    /// Whether federation with other servers is enabled.
    pub federation_enabled: bool,
    /// Default event/message retention period in days.
    pub default_retention_days: u32,
    /// Whether voice channels are enabled.
    pub voice_enabled: bool,
    /// Maximum number of members allowed on the server.
    pub max_members: u32,
    /// Rate limiting configuration for the admission layer.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// The server's core operating principles (VRP alignment input).
    #[serde(default)]
    pub principles: Vec<String>,
    /// Actions prohibited by the server (VRP alignment input).
    #[serde(default)]
    pub prohibited_actions: Vec<String>,
    /// Most permissive transfer scope this server will grant a peer.
    #[serde(default = "default_max_transfer_scope")]
    pub federation_max_transfer_scope: TransferScope,
    /// Minimum seconds between handshakes with the same peer. Values below
    /// the 60 s anti-flap floor are clamped up at enforcement time.
    #[serde(default = "default_rehandshake_min_seconds")]
    pub federation_rehandshake_min_seconds: u64,
    /// Seconds a federated identity attestation stays fresh before a
    /// consuming request forces synchronous re-verification.
    #[serde(default = "default_federation_freshness_seconds")]
    pub federation_freshness_seconds: u64,
    /// Optional hard expiry for federated identities. `None` relies solely
    /// on the freshness TTL.
    #[serde(default)]
    pub federated_identity_expiry_seconds: Option<u64>,
}

/// Hard floor for [`ServerPolicy::federation_rehandshake_min_seconds`].
pub const REHANDSHAKE_FLOOR_SECONDS: u64 = 60;

fn default_max_transfer_scope() -> TransferScope {
    TransferScope::ReflectionSummariesOnly
}

fn default_rehandshake_min_seconds() -> u64 {
    3600
}

fn default_federation_freshness_seconds() -> u64 {
    24 * 3600
}

/// Per-minute request budgets for the admission layer, by endpoint class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Max requests per minute for the registration endpoint, per IP.
    pub registration_limit: u32,
    /// Max requests per minute for the verification endpoint, per IP.
    pub verification_limit: u32,
    /// Max requests per minute for all other endpoints, per IP.
    pub default_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            registration_limit: 10,
            verification_limit: 30,
            default_limit: 120,
        }
    }
}

impl ServerPolicy {
    /// The re-handshake interval with the anti-flap floor applied.
    pub fn effective_rehandshake_min_seconds(&self) -> u64 {
        self.federation_rehandshake_min_seconds
            .max(REHANDSHAKE_FLOOR_SECONDS)
    }
}

impl Default for ServerPolicy {
    fn default() -> Self {
        Self {
            agent_min_alignment_score: 0.8,
            agent_required_capabilities: Vec::new(),
            federation_enabled: true,
            default_retention_days: 30,
            voice_enabled: true,
            max_members: 1000,
            rate_limit: RateLimitConfig::default(),
            principles: Vec::new(),
            prohibited_actions: Vec::new(),
            federation_max_transfer_scope: TransferScope::ReflectionSummariesOnly,
            federation_rehandshake_min_seconds: 3600,
            federation_freshness_seconds: 24 * 3600,
            federated_identity_expiry_seconds: None,
        }
    }
}
