//! Row types for the federation plane.

use serde::{Deserialize, Serialize};

use annex_types::{AlignmentStatus, TransferScope};
use annex_vrp::ValidationReport;

/// A known remote server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    /// Unique base URL of the remote server.
    pub base_url: String,
    pub label: String,
    /// SHA-256 fingerprint pinning `verifying_key_json`.
    pub public_key: String,
    /// The remote membership verifying key (snarkjs JSON).
    pub verifying_key_json: String,
    pub status: String,
    pub created_at: String,
}

/// Wire response of the handshake endpoint, shared by the inbound handler
/// and the outbound client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// The computed alignment status.
    pub alignment_status: AlignmentStatus,
    /// The negotiated transfer scope.
    pub transfer_scope: TransferScope,
    /// Public identifier of the agreement row written for this handshake.
    pub agreement_id: String,
}

/// An agreement row between the local server and a remote instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationAgreement {
    pub id: i64,
    /// Stable public identifier of this agreement version.
    pub agreement_uuid: String,
    pub local_server_id: i64,
    pub remote_instance_id: i64,
    pub alignment_status: AlignmentStatus,
    pub transfer_scope: TransferScope,
    /// The full validation report the row was written from.
    pub report: ValidationReport,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}
