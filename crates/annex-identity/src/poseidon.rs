//! Poseidon hashing over the BN254 scalar field.
//!
//! Uses the circom-compatible parameters from `light-poseidon`, so every
//! value computed here is bit-exact with the client-side circuit library.
//! [`circuit_compat_check`] validates that against fixed circomlib test
//! vectors; it runs once at server startup and aborts boot on mismatch.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher};

use crate::field::parse_field_dec;
use crate::IdentityError;

/// Hashes two field elements: the Merkle node function.
pub fn poseidon2(a: Fr, b: Fr) -> Result<Fr, IdentityError> {
    hash_inputs(&[a, b])
}

/// Hashes three field elements: the commitment function
/// `Poseidon(sk, roleCode, nodeId)`.
pub fn poseidon3(a: Fr, b: Fr, c: Fr) -> Result<Fr, IdentityError> {
    hash_inputs(&[a, b, c])
}

/// Hashes a slice of field elements with circom-compatible parameters.
///
/// # Errors
///
/// Returns [`IdentityError::Poseidon`] if the arity is unsupported or
/// hashing fails.
pub fn hash_inputs(inputs: &[Fr]) -> Result<Fr, IdentityError> {
    let mut poseidon = Poseidon::<Fr>::new_circom(inputs.len())
        .map_err(|e| IdentityError::Poseidon(format!("failed to initialize Poseidon: {e:?}")))?;

    poseidon
        .hash(inputs)
        .map_err(|e| IdentityError::Poseidon(format!("Poseidon hash failed: {e:?}")))
}

/// Known circomlib output for `Poseidon([1, 2])`.
const VECTOR_POSEIDON2: &str =
    "7853200120776062878684798364095072458815029376092732009249414926327459813530";

/// Known circomlib output for `Poseidon([1, 2, 3])`.
const VECTOR_POSEIDON3: &str =
    "6542985608222806190361240322586112750744169038454362455181422643027100751666";

/// Cross-checks both Poseidon instances against fixed circomlib vectors.
///
/// The path-bit encoding and the hash parameters are contractually
/// mirrored inside the ZK circuit; a server whose Poseidon disagrees with
/// the circuit library must not come up.
///
/// # Errors
///
/// Returns [`IdentityError::Poseidon`] if either instance produces a
/// value different from the published vector.
pub fn circuit_compat_check() -> Result<(), IdentityError> {
    let h2 = poseidon2(Fr::from(1u64), Fr::from(2u64))?;
    let expected2 = parse_field_dec(VECTOR_POSEIDON2)
        .map_err(|e| IdentityError::Poseidon(format!("bad poseidon2 vector: {e}")))?;
    if h2 != expected2 {
        return Err(IdentityError::Poseidon(
            "poseidon2 output disagrees with the circomlib test vector".to_string(),
        ));
    }

    let h3 = poseidon3(Fr::from(1u64), Fr::from(2u64), Fr::from(3u64))?;
    let expected3 = parse_field_dec(VECTOR_POSEIDON3)
        .map_err(|e| IdentityError::Poseidon(format!("bad poseidon3 vector: {e}")))?;
    if h3 != expected3 {
        return Err(IdentityError::Poseidon(
            "poseidon3 output disagrees with the circomlib test vector".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poseidon_is_deterministic() {
        let a = poseidon2(Fr::from(7u64), Fr::from(11u64)).unwrap();
        let b = poseidon2(Fr::from(7u64), Fr::from(11u64)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn poseidon_argument_order_matters() {
        let ab = poseidon2(Fr::from(1u64), Fr::from(2u64)).unwrap();
        let ba = poseidon2(Fr::from(2u64), Fr::from(1u64)).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn circuit_vectors_match() {
        circuit_compat_check().expect("poseidon must reproduce the circomlib vectors");
    }

    #[test]
    fn arity_two_and_three_differ() {
        let two = hash_inputs(&[Fr::from(1u64), Fr::from(2u64)]).unwrap();
        let three = hash_inputs(&[Fr::from(1u64), Fr::from(2u64), Fr::from(0u64)]).unwrap();
        assert_ne!(two, three);
    }
}
