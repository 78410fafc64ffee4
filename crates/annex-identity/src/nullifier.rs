//! Nullifier and pseudonym derivation.
//!
//! The derivation chain is two SHA-256 applications:
//!
//! ```text
//! nullifier_hex = sha256(commitment_hex ":" topic)
//! pseudonym_id  = sha256(topic ":" nullifier_hex)
//! ```
//!
//! The `(topic, nullifier)` pair is the replay-protection token of the ZK
//! plane: one activation per commitment per topic, enforced by the unique
//! constraint on `zk_nullifiers`. The pseudonym is the only identity the
//! rest of the server ever sees.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::IdentityError;

/// Hashes bytes to 64-char lower-case hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Derives the topic-scoped nullifier for a commitment.
///
/// `commitment_hex` must already be in canonical lower-case form; the
/// derivation is case-sensitive.
pub fn derive_nullifier_hex(commitment_hex: &str, topic: &str) -> String {
    sha256_hex(format!("{commitment_hex}:{topic}").as_bytes())
}

/// Derives the pseudonym for a topic and nullifier.
pub fn derive_pseudonym_id(topic: &str, nullifier_hex: &str) -> String {
    sha256_hex(format!("{topic}:{nullifier_hex}").as_bytes())
}

/// Inserts a consumed nullifier with its denormalised pseudonym and
/// commitment columns.
///
/// # Errors
///
/// Returns [`IdentityError::NullifierReplay`] if the `(topic, nullifier)`
/// pair (or the pseudonym) already exists.
pub fn insert_nullifier(
    conn: &Connection,
    topic: &str,
    nullifier_hex: &str,
    pseudonym_id: &str,
    commitment_hex: &str,
) -> Result<(), IdentityError> {
    let res = conn.execute(
        "INSERT INTO zk_nullifiers (topic, nullifier_hex, pseudonym_id, commitment_hex)
         VALUES (?1, ?2, ?3, ?4)",
        params![topic, nullifier_hex, pseudonym_id, commitment_hex],
    );

    match res {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            Err(IdentityError::NullifierReplay(topic.to_string()))
        }
        Err(e) => Err(IdentityError::Database(e)),
    }
}

/// Resolves a pseudonym back to its commitment via the denormalised
/// lookup column. Single indexed read; used by federation relay.
///
/// # Errors
///
/// Returns [`IdentityError::Database`] if the query fails.
pub fn resolve_commitment_for_pseudonym(
    conn: &Connection,
    pseudonym_id: &str,
) -> Result<Option<String>, IdentityError> {
    conn.query_row(
        "SELECT commitment_hex FROM zk_nullifiers WHERE pseudonym_id = ?1",
        params![pseudonym_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(IdentityError::Database)
}
