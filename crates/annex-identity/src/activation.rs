//! Membership verification and pseudonym activation.
//!
//! The verify pipeline, in order: topic and claim validation, historical
//! root check, literal public-signal match, Groth16 pairing check, then a
//! single transaction that consumes the nullifier, upserts the platform
//! identity, and appends `IDENTITY_ACTIVATED`. The CPU-bound pairing
//! check runs before the transaction opens, so no store or tree lock is
//! held across it.

use rusqlite::Connection;

use annex_observe::{emit_event, EventPayload};

use crate::field::parse_field_hex;
use crate::nullifier::{derive_nullifier_hex, derive_pseudonym_id, insert_nullifier};
use crate::platform::{upsert_platform_identity, PlatformIdentity};
use crate::registry::{role_for_commitment, root_is_known};
use crate::topic::validate_topic;
use crate::zk::{parse_proof, parse_public_signals, verify_proof, Bn254, VerifyingKey};
use crate::IdentityError;

/// A membership claim as submitted over the wire.
#[derive(Debug, Clone)]
pub struct MembershipClaim {
    /// The Merkle root the proof was generated against (64-char hex).
    pub root_hex: String,
    /// The identity commitment (64-char hex).
    pub commitment_hex: String,
    /// The topic the pseudonym will be scoped to.
    pub topic: String,
    /// The Groth16 proof as a snarkjs JSON object.
    pub proof: serde_json::Value,
    /// The two public signals, `[root, commitment]`.
    pub public_signals: Vec<String>,
}

/// Result of a successful activation.
#[derive(Debug)]
pub struct ActivationOutcome {
    /// The derived topic-scoped pseudonym.
    pub pseudonym_id: String,
    /// The platform identity the pseudonym now maps to.
    pub identity: PlatformIdentity,
}

/// Verifies a membership claim and activates the derived pseudonym.
///
/// # Errors
///
/// In pipeline order: [`IdentityError::InvalidInput`] (topic or hex),
/// [`IdentityError::UnknownRoot`], [`IdentityError::InvalidProof`]
/// (signal deserialisation), [`IdentityError::PublicSignalMismatch`],
/// [`IdentityError::InvalidProof`] (proof parse or pairing failure),
/// [`IdentityError::NullifierReplay`].
pub fn activate_membership(
    conn: &mut Connection,
    vkey: &VerifyingKey<Bn254>,
    server_id: i64,
    claim: &MembershipClaim,
) -> Result<ActivationOutcome, IdentityError> {
    validate_topic(&claim.topic)?;

    let (claimed_root, root_hex) = parse_field_hex(&claim.root_hex)?;
    let (claimed_commitment, commitment_hex) = parse_field_hex(&claim.commitment_hex)?;

    // Historical roots (active or retired) stay valid for verification:
    // a member may hold a path from before later appends.
    if !root_is_known(conn, &root_hex)? {
        return Err(IdentityError::UnknownRoot(root_hex));
    }

    let signals = parse_public_signals(&claim.public_signals)?;
    if signals[0] != claimed_root {
        return Err(IdentityError::PublicSignalMismatch(
            "proof root does not match claimed root".to_string(),
        ));
    }
    if signals[1] != claimed_commitment {
        return Err(IdentityError::PublicSignalMismatch(
            "proof commitment does not match claimed commitment".to_string(),
        ));
    }

    let proof = parse_proof(&claim.proof.to_string())?;
    if !verify_proof(vkey, &proof, &signals)? {
        return Err(IdentityError::InvalidProof("pairing check failed".to_string()));
    }

    record_activation(conn, server_id, &commitment_hex, &claim.topic)
}

/// Persists the effects of a verified membership claim: nullifier insert,
/// platform-identity upsert (with founder promotion), and the
/// `IDENTITY_ACTIVATED` event, all in one transaction.
///
/// Callers must have verified the proof; this function trusts the
/// commitment and topic it is given.
///
/// # Errors
///
/// [`IdentityError::NullifierReplay`] if this `(commitment, topic)` was
/// already activated; [`IdentityError::NotFound`] if the commitment is
/// not registered.
pub fn record_activation(
    conn: &mut Connection,
    server_id: i64,
    commitment_hex: &str,
    topic: &str,
) -> Result<ActivationOutcome, IdentityError> {
    let nullifier_hex = derive_nullifier_hex(commitment_hex, topic);
    let pseudonym_id = derive_pseudonym_id(topic, &nullifier_hex);

    let tx = conn.transaction()?;

    let participant_type = role_for_commitment(&tx, commitment_hex)?;

    insert_nullifier(&tx, topic, &nullifier_hex, &pseudonym_id, commitment_hex)?;

    let identity = upsert_platform_identity(&tx, server_id, &pseudonym_id, participant_type)?;

    emit_event(
        &tx,
        server_id,
        &pseudonym_id,
        &EventPayload::IdentityActivated {
            pseudonym_id: pseudonym_id.clone(),
            topic: topic.to_string(),
        },
    )?;

    tx.commit()?;

    tracing::info!(
        pseudonym = %pseudonym_id,
        topic,
        participant_type = participant_type.label(),
        "membership activated"
    );

    Ok(ActivationOutcome {
        pseudonym_id,
        identity,
    })
}
