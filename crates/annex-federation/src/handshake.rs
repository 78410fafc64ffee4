//! Inbound handshake processing — the agreement state machine.
//!
//! Every handshake is evaluated from scratch against the current local
//! policy; transitions are re-entrant and a `Conflict` peer may recover
//! on a later handshake. Each transition retires the previous active row,
//! inserts the new one, and appends the `FEDERATION_HANDSHAKE` event in
//! one transaction.

use chrono::NaiveDateTime;
use rusqlite::Connection;

use annex_observe::{emit_event, EventPayload};
use annex_types::ServerPolicy;
use annex_vrp::{evaluate_handshake, FederationHandshake, ServerPolicyRoot, ValidationReport};

use crate::agreements::{get_active_agreement, record_agreement};
use crate::error::FederationError;
use crate::types::Instance;

/// Result of a processed handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// Public identifier of the new agreement row.
    pub agreement_id: String,
    /// The validation report the agreement was written from.
    pub report: ValidationReport,
}

/// Seconds elapsed since a SQLite `datetime('now')` timestamp.
fn seconds_since(timestamp: &str) -> Option<u64> {
    let parsed = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S").ok()?;
    let elapsed = chrono::Utc::now().naive_utc() - parsed;
    u64::try_from(elapsed.num_seconds()).ok()
}

/// Processes an inbound federation handshake from a registered instance.
///
/// 1. Refuses when federation is disabled by policy.
/// 2. Enforces the re-handshake cadence (policy value, 60 s floor).
/// 3. Evaluates the remote anchor and offer against the local policy.
/// 4. In one transaction: retires the previous active agreement, writes
///    the new one, and emits `FEDERATION_HANDSHAKE`.
///
/// # Errors
///
/// [`FederationError::Denied`] when federation is disabled,
/// [`FederationError::HandshakeThrottled`] inside the cadence window.
pub fn process_incoming_handshake(
    conn: &mut Connection,
    server_id: i64,
    policy: &ServerPolicy,
    instance: &Instance,
    handshake: &FederationHandshake,
) -> Result<HandshakeOutcome, FederationError> {
    if !policy.federation_enabled {
        return Err(FederationError::Denied(
            "federation is disabled by server policy".to_string(),
        ));
    }

    let previous = get_active_agreement(conn, server_id, instance.id)?;

    if let Some(ref prev) = previous {
        let min_interval = policy.effective_rehandshake_min_seconds();
        if let Some(elapsed) = seconds_since(&prev.updated_at) {
            if elapsed < min_interval {
                return Err(FederationError::HandshakeThrottled {
                    retry_after_seconds: min_interval - elapsed,
                });
            }
        }
    }

    let local_anchor = ServerPolicyRoot::from_policy(policy).to_anchor_snapshot()?;
    let report = evaluate_handshake(
        &local_anchor,
        policy.federation_max_transfer_scope,
        handshake,
    );

    let previous_status = previous.map(|p| p.alignment_status.as_str().to_string());

    let report_value = serde_json::to_value(&report)
        .map_err(annex_observe::ObserveError::Serialization)?;

    let tx = conn.transaction()?;
    let agreement_id = record_agreement(&tx, server_id, instance.id, &report)?;
    emit_event(
        &tx,
        server_id,
        &agreement_id,
        &EventPayload::FederationHandshake {
            remote_url: instance.base_url.clone(),
            alignment_status: report.alignment_status.as_str().to_string(),
            transfer_scope: report.transfer_scope.as_str().to_string(),
            previous_status,
            report: report_value,
        },
    )?;
    tx.commit()?;

    tracing::info!(
        remote = %instance.base_url,
        alignment = report.alignment_status.as_str(),
        scope = report.transfer_scope.as_str(),
        "federation handshake recorded"
    );

    Ok(HandshakeOutcome {
        agreement_id,
        report,
    })
}
