//! Commitment registration and path retrieval.
//!
//! Registration is the only Merkle write path. It runs under the tree's
//! single-writer lock (held by the caller) and bundles the identity row,
//! the leaf append, the active-root swap, and the event-log record into
//! one store transaction. The in-memory tree advances only after commit.

use rusqlite::{params, Connection, OptionalExtension};

use annex_observe::{emit_event, EventPayload};
use annex_types::RoleCode;

use crate::field::{fr_to_hex, parse_field_hex};
use crate::merkle::MerkleTree;
use crate::IdentityError;

/// Result of a successful registration.
#[derive(Debug)]
pub struct RegistrationResult {
    /// Row id in `vrp_identities` (not the leaf index).
    pub identity_id: i64,
    /// The assigned Merkle leaf index.
    pub leaf_index: usize,
    /// The new active root.
    pub root_hex: String,
    /// Sibling hashes, leaf level first.
    pub path_elements: Vec<String>,
    /// Direction bits, leaf level first; 0 = authenticated node is left.
    pub path_index_bits: Vec<u8>,
}

/// An authentication path as of the current tree state.
#[derive(Debug)]
pub struct MerklePath {
    /// The leaf index of the commitment.
    pub leaf_index: usize,
    /// The current active root.
    pub root_hex: String,
    /// Sibling hashes, leaf level first.
    pub path_elements: Vec<String>,
    /// Direction bits, leaf level first.
    pub path_index_bits: Vec<u8>,
}

/// Registers a new identity commitment.
///
/// 1. Validates the commitment as a canonical field element.
/// 2. Previews the Merkle insertion (no mutation).
/// 3. In one transaction: inserts `vrp_identities`, appends the leaf,
///    swaps the active root, and emits `IDENTITY_REGISTERED`.
/// 4. On commit, applies the preview to the in-memory tree and returns
///    the post-insert authentication path.
///
/// # Errors
///
/// [`IdentityError::InvalidInput`] for a malformed or out-of-range
/// commitment, [`IdentityError::DuplicateCommitment`] if it is already
/// registered, [`IdentityError::CapacityExceeded`] when the tree is full.
pub fn register_identity(
    tree: &mut MerkleTree,
    conn: &mut Connection,
    server_id: i64,
    commitment_hex: &str,
    role: RoleCode,
    node_id: i64,
) -> Result<RegistrationResult, IdentityError> {
    let (leaf, commitment_hex) = parse_field_hex(commitment_hex)?;

    let (leaf_index, new_root, updates) = tree.preview_insert(leaf)?;

    let tx = conn.transaction()?;

    let identity_id = match tx.execute(
        "INSERT INTO vrp_identities (commitment_hex, role_code, node_id) VALUES (?1, ?2, ?3)",
        params![commitment_hex, role.as_u8(), node_id],
    ) {
        Ok(_) => tx.last_insert_rowid(),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(IdentityError::DuplicateCommitment(commitment_hex));
        }
        Err(e) => return Err(IdentityError::Database(e)),
    };

    tree.persist_insert(&tx, leaf_index, &commitment_hex, new_root)?;

    emit_event(
        &tx,
        server_id,
        &commitment_hex,
        &EventPayload::IdentityRegistered {
            commitment_hex: commitment_hex.clone(),
            role_code: role.as_u8(),
            leaf_index: leaf_index as u64,
        },
    )?;

    tx.commit()?;

    // The store committed; only now may the in-memory tree advance.
    tree.apply_updates(leaf_index + 1, updates);

    let (path_elements_fr, path_index_bits) = tree.get_proof(leaf_index)?;

    Ok(RegistrationResult {
        identity_id,
        leaf_index,
        root_hex: fr_to_hex(new_root),
        path_elements: path_elements_fr.into_iter().map(fr_to_hex).collect(),
        path_index_bits,
    })
}

/// Retrieves the current authentication path for a registered commitment.
///
/// Clients call this to refresh their path before proof generation, since
/// later appends mutate sibling hashes.
///
/// # Errors
///
/// [`IdentityError::InvalidInput`] for malformed hex,
/// [`IdentityError::NotFound`] if the commitment is not registered.
pub fn get_path_for_commitment(
    tree: &MerkleTree,
    conn: &Connection,
    commitment_hex: &str,
) -> Result<MerklePath, IdentityError> {
    let (_, commitment_hex) = parse_field_hex(commitment_hex)?;

    let leaf_index: Option<i64> = conn
        .query_row(
            "SELECT leaf_index FROM vrp_leaves WHERE commitment_hex = ?1",
            params![commitment_hex],
            |row| row.get(0),
        )
        .optional()?;

    let leaf_index = leaf_index
        .ok_or_else(|| IdentityError::NotFound(format!("commitment '{commitment_hex}'")))?
        as usize;

    let (path_elements_fr, path_index_bits) = tree.get_proof(leaf_index)?;

    Ok(MerklePath {
        leaf_index,
        root_hex: tree.root_hex(),
        path_elements: path_elements_fr.into_iter().map(fr_to_hex).collect(),
        path_index_bits,
    })
}

/// Looks up the declared role of a registered commitment.
///
/// # Errors
///
/// [`IdentityError::NotFound`] if the commitment is not registered, or
/// [`IdentityError::InvalidInput`] if the stored role code is unknown.
pub fn role_for_commitment(
    conn: &Connection,
    commitment_hex: &str,
) -> Result<RoleCode, IdentityError> {
    let code: Option<u8> = conn
        .query_row(
            "SELECT role_code FROM vrp_identities WHERE commitment_hex = ?1",
            params![commitment_hex],
            |row| row.get(0),
        )
        .optional()?;

    let code =
        code.ok_or_else(|| IdentityError::NotFound(format!("commitment '{commitment_hex}'")))?;

    RoleCode::from_u8(code)
        .ok_or_else(|| IdentityError::InvalidInput(format!("stored role code {code}")))
}

/// Returns whether `root_hex` is among the server's historical roots
/// (active or retired).
///
/// # Errors
///
/// Returns [`IdentityError::Database`] on SQL failure.
pub fn root_is_known(conn: &Connection, root_hex: &str) -> Result<bool, IdentityError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM vrp_roots WHERE root_hex = ?1",
        params![root_hex],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Sanity helper used by tests: a commitment hex for a small integer.
#[cfg(test)]
pub(crate) fn test_commitment(n: u64) -> String {
    fr_to_hex(crate::zk::Fr::from(n))
}
