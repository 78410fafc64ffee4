//! Federation handlers: inbound handshake, identity attestation, and the
//! instance registry.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Json};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use annex_db::with_busy_retry;
use annex_federation::{
    get_instance_by_url, initiate_handshake, list_instances, process_attestation,
    process_incoming_handshake, register_instance, Attestation, HandshakeResponse, Instance,
};
use annex_types::{ErrorKind, ServerPolicy};
use annex_vrp::{CapabilityContract, FederationHandshake, ServerPolicyRoot};

use crate::admission::require_capability;
use crate::api::{run_blocking, ApiError};
use crate::AppState;

/// Deadline for handshake processing.
const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);
/// Deadline for attestation processing (covers the pairing check).
const ATTEST_DEADLINE: Duration = Duration::from_secs(20);

/// Reads the calling pseudonym from the `X-Annex-Pseudonym` header.
fn caller_pseudonym(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-annex-pseudonym")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::new(
                ErrorKind::FederationDenied,
                "missing X-Annex-Pseudonym header",
            )
        })
}

fn policy_snapshot(state: &AppState) -> Result<ServerPolicy, ApiError> {
    state
        .policy
        .read()
        .map(|p| p.clone())
        .map_err(|_| ApiError::internal("policy lock poisoned"))
}

/// Request body for an inbound handshake. The peer identifies itself by
/// base URL; it must already be registered as an instance.
#[derive(Debug, Deserialize)]
pub struct HandshakeRequest {
    /// Base URL of the requesting server.
    pub base_url: String,
    /// The VRP handshake payload.
    #[serde(flatten)]
    pub handshake: FederationHandshake,
}

/// Handler for `POST /api/federation/handshake`.
pub async fn handshake_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<HandshakeRequest>,
) -> Result<Json<HandshakeResponse>, ApiError> {
    let policy = policy_snapshot(&state)?;

    let outcome = run_blocking(HANDSHAKE_DEADLINE, move || {
        let mut conn = state.pool.get()?;

        let instance = get_instance_by_url(&conn, &payload.base_url)?.ok_or_else(|| {
            ApiError::new(
                ErrorKind::NotFound,
                format!("unknown remote instance '{}'", payload.base_url),
            )
        })?;

        let outcome = with_busy_retry(|| {
            process_incoming_handshake(
                &mut conn,
                state.server_id,
                &policy,
                &instance,
                &payload.handshake,
            )
        })?;
        Ok(outcome)
    })
    .await?;

    Ok(Json(HandshakeResponse {
        alignment_status: outcome.report.alignment_status,
        transfer_scope: outcome.report.transfer_scope,
        agreement_id: outcome.agreement_id,
    }))
}

/// Request body for identity attestation.
#[derive(Debug, Deserialize)]
pub struct AttestIdentityRequest {
    pub remote_instance_id: i64,
    #[serde(rename = "commitmentHex")]
    pub commitment_hex: String,
    #[serde(rename = "vrpTopic")]
    pub vrp_topic: String,
    pub proof: serde_json::Value,
    #[serde(rename = "publicSignals")]
    pub public_signals: Vec<String>,
    #[serde(rename = "remoteRootHex")]
    pub remote_root_hex: String,
}

/// Response body for identity attestation.
#[derive(Debug, Serialize, Deserialize)]
pub struct AttestIdentityResponse {
    #[serde(rename = "pseudonymId")]
    pub pseudonym_id: String,
}

/// Handler for `POST /api/federation/attest-identity`.
///
/// A federation write: the caller must hold `can_federate`.
pub async fn attest_identity_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AttestIdentityRequest>,
) -> Result<Json<AttestIdentityResponse>, ApiError> {
    let caller = caller_pseudonym(&headers)?;
    let policy = policy_snapshot(&state)?;

    let pseudonym_id = run_blocking(ATTEST_DEADLINE, move || {
        let mut conn = state.pool.get()?;

        require_capability(&conn, state.server_id, &caller, |c| c.can_federate, "federate")?;

        let attestation = Attestation {
            remote_instance_id: payload.remote_instance_id,
            commitment_hex: payload.commitment_hex,
            vrp_topic: payload.vrp_topic,
            proof: payload.proof,
            public_signals: payload.public_signals,
            remote_root_hex: payload.remote_root_hex,
        };

        let pseudonym = with_busy_retry(|| {
            process_attestation(&mut conn, state.server_id, &policy, &attestation)
        })?;
        Ok(pseudonym)
    })
    .await?;

    Ok(Json(AttestIdentityResponse { pseudonym_id }))
}

/// Request body for instance registration.
#[derive(Debug, Deserialize)]
pub struct RegisterInstanceRequest {
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(default)]
    pub label: String,
    /// The remote membership verifying key (snarkjs JSON).
    #[serde(rename = "verifyingKey")]
    pub verifying_key: serde_json::Value,
}

/// Handler for `POST /api/federation/instances`.
///
/// A federation write: the caller must hold `can_federate`. Registering
/// pins the remote verifying key by fingerprint.
pub async fn register_instance_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<RegisterInstanceRequest>,
) -> Result<Json<Instance>, ApiError> {
    let caller = caller_pseudonym(&headers)?;

    let instance = run_blocking(HANDSHAKE_DEADLINE, move || {
        let conn = state.pool.get()?;
        require_capability(&conn, state.server_id, &caller, |c| c.can_federate, "federate")?;

        let vk_json = payload.verifying_key.to_string();
        let instance = register_instance(&conn, &payload.base_url, &payload.label, &vk_json)?;
        Ok(instance)
    })
    .await?;

    Ok(Json(instance))
}

/// Handler for `GET /api/federation/instances`.
pub async fn list_instances_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Instance>>, ApiError> {
    let instances = run_blocking(HANDSHAKE_DEADLINE, move || {
        let conn = state.pool.get()?;
        let instances = list_instances(&conn)?;
        Ok(instances)
    })
    .await?;

    Ok(Json(instances))
}

/// Request body for initiating an outbound handshake.
#[derive(Debug, Deserialize)]
pub struct OutboundHandshakeRequest {
    #[serde(rename = "baseUrl")]
    pub base_url: String,
}

/// Handler for `POST /api/federation/peers/handshake`.
///
/// Builds the local handshake payload from the active policy and submits
/// it to the peer. The peer's verdict is returned verbatim; our own
/// agreement row changes only when the peer handshakes back.
pub async fn outbound_handshake_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<OutboundHandshakeRequest>,
) -> Result<Json<HandshakeResponse>, ApiError> {
    let caller = caller_pseudonym(&headers)?;
    let policy = policy_snapshot(&state)?;

    {
        let state = state.clone();
        let caller = caller.clone();
        run_blocking(HANDSHAKE_DEADLINE, move || {
            let conn = state.pool.get()?;
            require_capability(&conn, state.server_id, &caller, |c| c.can_federate, "federate")?;
            Ok(())
        })
        .await?;
    }

    if !policy.federation_enabled {
        return Err(ApiError::new(
            ErrorKind::FederationDenied,
            "federation is disabled by server policy",
        ));
    }

    let anchor = ServerPolicyRoot::from_policy(&policy)
        .to_anchor_snapshot()
        .map_err(ApiError::internal)?;

    let mut offered_capabilities = vec!["TEXT".to_string(), "VRP".to_string()];
    if policy.voice_enabled {
        offered_capabilities.push("VOICE".to_string());
    }
    if policy.federation_enabled {
        offered_capabilities.push("FEDERATION".to_string());
    }

    let handshake = FederationHandshake {
        anchor_snapshot: anchor,
        capability_contract: CapabilityContract {
            required_capabilities: policy.agent_required_capabilities.clone(),
            offered_capabilities,
        },
        offered_transfer_scope: policy.federation_max_transfer_scope,
    };

    let verdict = tokio::time::timeout(
        HANDSHAKE_DEADLINE,
        initiate_handshake(&payload.base_url, &handshake),
    )
    .await
    .map_err(|_| ApiError::timeout())??;

    Ok(Json(verdict))
}
