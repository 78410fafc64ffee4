//! Federated identity cache — remote-attested pseudonyms.
//!
//! An attestation is accepted only under an active, non-Conflict
//! agreement whose scope permits identity transfer, and only when the
//! proof verifies against the verifying key pinned for the attesting
//! instance. Accepted rows cache the proof so a later freshness check can
//! replay verification without a round trip to the origin server.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};

use annex_identity::zk::{parse_proof, parse_public_signals, parse_verification_key, verify_proof, vkey_fingerprint};
use annex_identity::{derive_nullifier_hex, derive_pseudonym_id, parse_field_hex, validate_topic, IdentityError};
use annex_observe::{emit_event, EventPayload};
use annex_types::{AlignmentStatus, ServerPolicy, TransferScope};

use crate::agreements::{get_active_agreement, get_instance};
use crate::error::FederationError;
use crate::types::Instance;

/// An identity attestation submitted by (or about) a remote peer.
#[derive(Debug, Clone)]
pub struct Attestation {
    /// Row id of the attesting instance.
    pub remote_instance_id: i64,
    /// The commitment registered on the remote server (64-char hex).
    pub commitment_hex: String,
    /// The VRP topic of the attestation.
    pub vrp_topic: String,
    /// The Groth16 proof as snarkjs JSON.
    pub proof: serde_json::Value,
    /// The two public signals, `[remoteRoot, commitment]`.
    pub public_signals: Vec<String>,
    /// The remote Merkle root the proof was generated against.
    pub remote_root_hex: String,
}

/// A cached federated identity row.
#[derive(Debug, Clone)]
pub struct FederatedIdentity {
    pub id: i64,
    pub local_server_id: i64,
    pub remote_instance_id: i64,
    pub commitment_hex: String,
    pub pseudonym_id: String,
    pub vrp_topic: String,
    pub root_hex_at_verification: String,
    pub last_verified_at: String,
    pub expires_at: Option<String>,
}

/// Checks that the active agreement with `remote_instance_id` permits
/// identity transfer.
fn require_transfer_permitted(
    conn: &Connection,
    server_id: i64,
    remote_instance_id: i64,
) -> Result<(), FederationError> {
    let agreement = get_active_agreement(conn, server_id, remote_instance_id)?
        .ok_or_else(|| FederationError::Denied("no active federation agreement".to_string()))?;

    if agreement.alignment_status == AlignmentStatus::Conflict {
        return Err(FederationError::Denied(
            "federation agreement is in conflict".to_string(),
        ));
    }
    // Identity exchange is a transfer.
    if agreement.transfer_scope < TransferScope::ReflectionSummariesOnly {
        return Err(FederationError::Denied(
            "agreement transfer scope does not permit identity exchange".to_string(),
        ));
    }
    Ok(())
}

/// Verifies an attestation proof against an instance's pinned key.
fn verify_against_pinned_key(
    instance: &Instance,
    remote_root_hex: &str,
    commitment_hex: &str,
    proof: &serde_json::Value,
    public_signals: &[String],
) -> Result<(), FederationError> {
    // The fingerprint column is the pin; a stored key that no longer
    // matches it must never be used for verification.
    if vkey_fingerprint(&instance.verifying_key_json) != instance.public_key {
        return Err(FederationError::UntrustedPeerKey);
    }
    let vkey = parse_verification_key(&instance.verifying_key_json)?;

    let (claimed_root, _) = parse_field_hex(remote_root_hex)?;
    let (claimed_commitment, _) = parse_field_hex(commitment_hex)?;

    let signals = parse_public_signals(public_signals)?;
    if signals[0] != claimed_root || signals[1] != claimed_commitment {
        return Err(IdentityError::PublicSignalMismatch(
            "attestation signals do not match claimed root/commitment".to_string(),
        )
        .into());
    }

    let proof = parse_proof(&proof.to_string())?;
    if !verify_proof(&vkey, &proof, &signals)? {
        return Err(
            IdentityError::InvalidProof("attestation pairing check failed".to_string()).into(),
        );
    }
    Ok(())
}

/// Processes a remote identity attestation end to end.
///
/// # Errors
///
/// [`FederationError::UnknownInstance`], [`FederationError::Denied`],
/// [`FederationError::UntrustedPeerKey`], or an identity-plane error for
/// malformed signals/proof.
pub fn process_attestation(
    conn: &mut Connection,
    server_id: i64,
    policy: &ServerPolicy,
    attestation: &Attestation,
) -> Result<String, FederationError> {
    let instance = get_instance(conn, attestation.remote_instance_id)?.ok_or_else(|| {
        FederationError::UnknownInstance(attestation.remote_instance_id.to_string())
    })?;

    require_transfer_permitted(conn, server_id, instance.id)?;
    validate_topic(&attestation.vrp_topic)?;

    verify_against_pinned_key(
        &instance,
        &attestation.remote_root_hex,
        &attestation.commitment_hex,
        &attestation.proof,
        &attestation.public_signals,
    )?;

    record_attested_identity(conn, server_id, policy, &instance, attestation)
}

/// Persists a verified attestation: upserts the cache row with an
/// explicit `last_verified_at`, applies the optional policy expiry, and
/// emits `FEDERATED_IDENTITY_ATTESTED`, all in one transaction.
///
/// Callers must have verified the proof; this function trusts the
/// attestation it is given.
pub fn record_attested_identity(
    conn: &mut Connection,
    server_id: i64,
    policy: &ServerPolicy,
    instance: &Instance,
    attestation: &Attestation,
) -> Result<String, FederationError> {
    let (_, commitment_hex) = parse_field_hex(&attestation.commitment_hex)?;
    let (_, remote_root_hex) = parse_field_hex(&attestation.remote_root_hex)?;

    let nullifier_hex = derive_nullifier_hex(&commitment_hex, &attestation.vrp_topic);
    let pseudonym_id = derive_pseudonym_id(&attestation.vrp_topic, &nullifier_hex);

    let proof_json = attestation.proof.to_string();
    let signals_json = serde_json::to_string(&attestation.public_signals)
        .map_err(annex_observe::ObserveError::Serialization)?;

    let expires_clause = policy
        .federated_identity_expiry_seconds
        .map(|secs| format!("datetime('now', '+{secs} seconds')"));

    let tx = conn.transaction()?;

    // last_verified_at is always written explicitly; the schema has no
    // default to fall back on.
    tx.execute(
        &format!(
            "INSERT INTO federated_identities (
                local_server_id, remote_instance_id, commitment_hex, pseudonym_id,
                vrp_topic, root_hex_at_verification, proof_json, public_signals_json,
                last_verified_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'), {expires})
            ON CONFLICT(local_server_id, remote_instance_id, commitment_hex, vrp_topic)
            DO UPDATE SET
                root_hex_at_verification = excluded.root_hex_at_verification,
                proof_json = excluded.proof_json,
                public_signals_json = excluded.public_signals_json,
                last_verified_at = datetime('now'),
                expires_at = excluded.expires_at",
            expires = expires_clause.as_deref().unwrap_or("NULL"),
        ),
        params![
            server_id,
            instance.id,
            commitment_hex,
            pseudonym_id,
            attestation.vrp_topic,
            remote_root_hex,
            proof_json,
            signals_json,
        ],
    )?;

    emit_event(
        &tx,
        server_id,
        &pseudonym_id,
        &EventPayload::FederatedIdentityAttested {
            pseudonym_id: pseudonym_id.clone(),
            remote_url: instance.base_url.clone(),
            vrp_topic: attestation.vrp_topic.clone(),
        },
    )?;

    tx.commit()?;

    Ok(pseudonym_id)
}

fn federated_identity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FederatedIdentity> {
    Ok(FederatedIdentity {
        id: row.get(0)?,
        local_server_id: row.get(1)?,
        remote_instance_id: row.get(2)?,
        commitment_hex: row.get(3)?,
        pseudonym_id: row.get(4)?,
        vrp_topic: row.get(5)?,
        root_hex_at_verification: row.get(6)?,
        last_verified_at: row.get(7)?,
        expires_at: row.get(8)?,
    })
}

fn seconds_since(timestamp: &str) -> Option<u64> {
    let parsed = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S").ok()?;
    let elapsed = chrono::Utc::now().naive_utc() - parsed;
    u64::try_from(elapsed.num_seconds()).ok()
}

fn is_past(timestamp: &str) -> bool {
    seconds_since(timestamp).is_some()
}

/// Resolves a federated identity for consumption, enforcing the
/// freshness policy.
///
/// A record within `federation_freshness_seconds` of its last
/// verification is returned as-is. A stale (or hard-expired) record is
/// synchronously re-verified by replaying the cached proof against the
/// pinned instance key; on success `last_verified_at` advances, on
/// failure the record is deleted and the caller gets
/// [`FederationError::IdentityExpired`].
///
/// # Errors
///
/// [`FederationError::Denied`] if the parent agreement no longer permits
/// transfer, `NotFound` via [`FederationError::UnknownInstance`]-style
/// lookup failures, or [`FederationError::IdentityExpired`].
pub fn resolve_federated_identity(
    conn: &mut Connection,
    server_id: i64,
    policy: &ServerPolicy,
    pseudonym_id: &str,
) -> Result<FederatedIdentity, FederationError> {
    let row = conn
        .query_row(
            "SELECT id, local_server_id, remote_instance_id, commitment_hex, pseudonym_id,
                    vrp_topic, root_hex_at_verification, last_verified_at, expires_at
             FROM federated_identities
             WHERE local_server_id = ?1 AND pseudonym_id = ?2",
            params![server_id, pseudonym_id],
            federated_identity_from_row,
        )
        .optional()?
        .ok_or_else(|| {
            FederationError::Identity(IdentityError::NotFound(format!(
                "federated identity '{pseudonym_id}'"
            )))
        })?;

    // The parent agreement gates every consumption, not just admission
    // into the cache.
    require_transfer_permitted(conn, server_id, row.remote_instance_id)?;

    let hard_expired = row.expires_at.as_deref().is_some_and(is_past);
    let stale = seconds_since(&row.last_verified_at)
        .map_or(true, |elapsed| elapsed > policy.federation_freshness_seconds);

    if !hard_expired && !stale {
        return Ok(row);
    }

    // Stale: replay the cached proof through the same pipeline.
    let instance = get_instance(conn, row.remote_instance_id)?
        .ok_or_else(|| FederationError::UnknownInstance(row.remote_instance_id.to_string()))?;

    let (proof, signals) = load_cached_proof(conn, row.id)?;

    let reverified = !hard_expired
        && verify_against_pinned_key(
            &instance,
            &row.root_hex_at_verification,
            &row.commitment_hex,
            &proof,
            &signals,
        )
        .is_ok();

    if reverified {
        conn.execute(
            "UPDATE federated_identities SET last_verified_at = datetime('now') WHERE id = ?1",
            params![row.id],
        )?;
        return Ok(row);
    }

    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM federated_identities WHERE id = ?1",
        params![row.id],
    )?;
    emit_event(
        &tx,
        server_id,
        pseudonym_id,
        &EventPayload::FederatedIdentityExpired {
            pseudonym_id: pseudonym_id.to_string(),
            remote_url: instance.base_url.clone(),
        },
    )?;
    tx.commit()?;

    Err(FederationError::IdentityExpired(pseudonym_id.to_string()))
}

fn load_cached_proof(
    conn: &Connection,
    row_id: i64,
) -> Result<(serde_json::Value, Vec<String>), FederationError> {
    let (proof_json, signals_json): (String, String) = conn.query_row(
        "SELECT proof_json, public_signals_json FROM federated_identities WHERE id = ?1",
        params![row_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let proof = serde_json::from_str(&proof_json)
        .map_err(annex_observe::ObserveError::Serialization)?;
    let signals = serde_json::from_str(&signals_json)
        .map_err(annex_observe::ObserveError::Serialization)?;
    Ok((proof, signals))
}
