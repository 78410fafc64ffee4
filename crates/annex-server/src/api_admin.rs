//! Moderator surfaces: policy updates and capability edits.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Json, Path};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use annex_db::with_busy_retry;
use annex_identity::{update_capabilities, IdentityError};
use annex_observe::{emit_event, EventPayload};
use annex_types::{Capabilities, ErrorKind, ServerPolicy};

use crate::admission::require_capability;
use crate::api::{run_blocking, ApiError};
use crate::policy::append_policy_version;
use crate::AppState;

const ADMIN_DEADLINE: Duration = Duration::from_secs(5);

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

/// Response body for a policy update.
#[derive(Debug, Serialize, Deserialize)]
pub struct PolicyUpdateResponse {
    #[serde(rename = "versionId")]
    pub version_id: i64,
}

/// Handler for `PUT /api/admin/policy`.
///
/// Appends a new immutable policy version and swaps the in-memory
/// snapshot. Requires `can_moderate`.
pub async fn update_policy_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(new_policy): Json<ServerPolicy>,
) -> Result<Json<PolicyUpdateResponse>, ApiError> {
    let caller = caller_pseudonym(&headers)?;

    let state_for_write = state.clone();
    let policy_for_store = new_policy.clone();
    let version_id = run_blocking(ADMIN_DEADLINE, move || {
        let mut conn = state_for_write.pool.get()?;
        require_capability(
            &conn,
            state_for_write.server_id,
            &caller,
            |c| c.can_moderate,
            "moderate",
        )?;

        let version_id = with_busy_retry(|| -> Result<i64, IdentityError> {
            let tx = conn.transaction()?;
            let version_id =
                append_policy_version(&tx, state_for_write.server_id, &policy_for_store)?;
            emit_event(
                &tx,
                state_for_write.server_id,
                &version_id.to_string(),
                &EventPayload::PolicyUpdated {
                    version_id,
                    moderator_pseudonym: caller.clone(),
                },
            )?;
            tx.commit()?;
            Ok(version_id)
        })?;
        Ok(version_id)
    })
    .await?;

    // Swap the live snapshot only after the version row committed.
    *state
        .policy
        .write()
        .map_err(|_| ApiError::internal("policy lock poisoned"))? = new_policy;

    Ok(Json(PolicyUpdateResponse { version_id }))
}

/// Handler for `GET /api/admin/policy`.
pub async fn get_policy_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ServerPolicy>, ApiError> {
    let policy = state
        .policy
        .read()
        .map(|p| p.clone())
        .map_err(|_| ApiError::internal("policy lock poisoned"))?;
    Ok(Json(policy))
}

/// Request body for a capability edit.
#[derive(Debug, Deserialize)]
pub struct CapabilityUpdateRequest {
    pub capabilities: Capabilities,
}

/// Handler for `PATCH /api/identities/{pseudonymId}/capabilities`.
///
/// Requires `can_moderate`. The gate and the edit read and write the
/// store directly, so the change is visible to the next admission check.
pub async fn update_capabilities_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(pseudonym_id): Path<String>,
    Json(payload): Json<CapabilityUpdateRequest>,
) -> Result<Json<Capabilities>, ApiError> {
    let caller = caller_pseudonym(&headers)?;

    let caps = run_blocking(ADMIN_DEADLINE, move || {
        let mut conn = state.pool.get()?;
        require_capability(&conn, state.server_id, &caller, |c| c.can_moderate, "moderate")?;

        with_busy_retry(|| -> Result<(), IdentityError> {
            let tx = conn.transaction()?;
            update_capabilities(&tx, state.server_id, &pseudonym_id, payload.capabilities)?;
            emit_event(
                &tx,
                state.server_id,
                &pseudonym_id,
                &EventPayload::CapabilitiesUpdated {
                    moderator_pseudonym: caller.clone(),
                    target_pseudonym: pseudonym_id.clone(),
                },
            )?;
            tx.commit()?;
            Ok(())
        })?;
        Ok(payload.capabilities)
    })
    .await?;

    Ok(Json(caps))
}
