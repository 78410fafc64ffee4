//! Identity commitment construction.
//!
//! A commitment is `Poseidon(sk, roleCode, nodeId)` over the BN254 scalar
//! field. Servers normally only ever *receive* commitments; this helper is
//! used by tests and by operators bootstrapping service identities.

use ark_bn254::Fr;

use annex_types::RoleCode;

use crate::field::fr_to_hex;
use crate::poseidon::poseidon3;
use crate::IdentityError;

/// Computes the commitment for a secret key, role, and node id.
///
/// Output is the canonical 64-char lower-case hex form used everywhere in
/// the registry.
///
/// # Errors
///
/// Returns [`IdentityError::Poseidon`] if hashing fails.
pub fn generate_commitment(sk: Fr, role: RoleCode, node_id: u64) -> Result<String, IdentityError> {
    let commitment = poseidon3(sk, Fr::from(role.as_u8()), Fr::from(node_id))?;
    Ok(fr_to_hex(commitment))
}
