//! Groth16 proof and verifying-key handling.
//!
//! Proofs and keys arrive in snarkjs JSON format. Deserialisation is
//! strict: coordinates must parse as canonical base-field elements, points
//! must lie on the curve and in the prime-order subgroup, and public
//! signals must be canonical scalar representations in `[0, r)`. The
//! membership circuit exposes exactly two public signals,
//! `[root, commitment]`.

pub use ark_bn254::{Bn254, Fr, G1Affine, G2Affine};
use ark_bn254::{Fq, Fq2};
use ark_ec::AffineRepr;
use ark_groth16::Groth16;
pub use ark_groth16::{Proof, VerifyingKey};
use ark_snark::SNARK;
use serde::Deserialize;
use std::str::FromStr;

use crate::field::parse_signal;
use crate::nullifier::sha256_hex;
use crate::IdentityError;

/// Number of public signals of the membership circuit.
pub const MEMBERSHIP_PUBLIC_INPUTS: usize = 2;

#[derive(Deserialize)]
struct SnarkJsProof {
    pi_a: Vec<String>,
    pi_b: Vec<Vec<String>>,
    pi_c: Vec<String>,
}

#[derive(Deserialize)]
struct SnarkJsVKey {
    vk_alpha_1: Vec<String>,
    vk_beta_2: Vec<Vec<String>>,
    vk_gamma_2: Vec<Vec<String>>,
    vk_delta_2: Vec<Vec<String>>,
    #[serde(rename = "IC")]
    ic: Vec<Vec<String>>,
}

fn parse_fq(s: &str) -> Result<Fq, IdentityError> {
    Fq::from_str(s)
        .map_err(|_| IdentityError::InvalidProof(format!("bad base-field coordinate '{s}'")))
}

/// Validates that a G1 point lies on the BN254 curve and in the correct
/// prime-order subgroup. Rejecting off-curve or wrong-subgroup points
/// blocks invalid-curve attacks on the pairing check.
fn validate_g1(point: &G1Affine) -> Result<(), IdentityError> {
    if point.is_zero() {
        // The identity (point at infinity) is a valid group element.
        return Ok(());
    }
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(IdentityError::InvalidProof("G1 point not in group".to_string()));
    }
    Ok(())
}

/// Validates that a G2 point lies on the twist curve and in the correct
/// prime-order subgroup.
fn validate_g2(point: &G2Affine) -> Result<(), IdentityError> {
    if point.is_zero() {
        return Ok(());
    }
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(IdentityError::InvalidProof("G2 point not in group".to_string()));
    }
    Ok(())
}

fn parse_g1(v: &[String]) -> Result<G1Affine, IdentityError> {
    if v.len() < 2 {
        return Err(IdentityError::InvalidProof("short G1 coordinate array".to_string()));
    }
    let point = G1Affine::new_unchecked(parse_fq(&v[0])?, parse_fq(&v[1])?);
    validate_g1(&point)?;
    Ok(point)
}

fn parse_g2(v: &[Vec<String>]) -> Result<G2Affine, IdentityError> {
    if v.len() < 2 || v[0].len() < 2 || v[1].len() < 2 {
        return Err(IdentityError::InvalidProof("short G2 coordinate array".to_string()));
    }
    // snarkjs G2 layout is [[x_c0, x_c1], [y_c0, y_c1], ...]; arkworks Fq2
    // is c0 + c1*u.
    let x = Fq2::new(parse_fq(&v[0][0])?, parse_fq(&v[0][1])?);
    let y = Fq2::new(parse_fq(&v[1][0])?, parse_fq(&v[1][1])?);

    let point = G2Affine::new_unchecked(x, y);
    validate_g2(&point)?;
    Ok(point)
}

/// Parses a snarkjs proof object.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidProof`] for malformed JSON or points
/// outside the groups.
pub fn parse_proof(json: &str) -> Result<Proof<Bn254>, IdentityError> {
    let raw: SnarkJsProof = serde_json::from_str(json)
        .map_err(|e| IdentityError::InvalidProof(format!("proof json: {e}")))?;

    Ok(Proof {
        a: parse_g1(&raw.pi_a)?,
        b: parse_g2(&raw.pi_b)?,
        c: parse_g1(&raw.pi_c)?,
    })
}

/// Parses a snarkjs verifying key.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidProof`] for malformed JSON or points
/// outside the groups.
pub fn parse_verification_key(json: &str) -> Result<VerifyingKey<Bn254>, IdentityError> {
    let raw: SnarkJsVKey = serde_json::from_str(json)
        .map_err(|e| IdentityError::InvalidProof(format!("verifying key json: {e}")))?;

    let mut gamma_abc_g1 = Vec::with_capacity(raw.ic.len());
    for p in raw.ic {
        gamma_abc_g1.push(parse_g1(&p)?);
    }

    Ok(VerifyingKey {
        alpha_g1: parse_g1(&raw.vk_alpha_1)?,
        beta_g2: parse_g2(&raw.vk_beta_2)?,
        gamma_g2: parse_g2(&raw.vk_gamma_2)?,
        delta_g2: parse_g2(&raw.vk_delta_2)?,
        gamma_abc_g1,
    })
}

/// Checks that a verifying key matches the membership circuit shape
/// (exactly two public signals). Servers abort startup on mismatch.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidProof`] if the IC length is wrong.
pub fn validate_membership_vkey(vk: &VerifyingKey<Bn254>) -> Result<(), IdentityError> {
    let expected = MEMBERSHIP_PUBLIC_INPUTS + 1;
    if vk.gamma_abc_g1.len() != expected {
        return Err(IdentityError::InvalidProof(format!(
            "verifying key exposes {} public inputs, membership circuit has {}",
            vk.gamma_abc_g1.len().saturating_sub(1),
            MEMBERSHIP_PUBLIC_INPUTS
        )));
    }
    Ok(())
}

/// SHA-256 fingerprint of a verifying key's JSON serialisation. Remote
/// instance keys are pinned by this fingerprint.
pub fn vkey_fingerprint(vk_json: &str) -> String {
    sha256_hex(vk_json.as_bytes())
}

/// Parses the public signal strings into field elements.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidProof`] if the count is wrong or any
/// signal is not a canonical representation of a value in `[0, r)`.
pub fn parse_public_signals(signals: &[String]) -> Result<Vec<Fr>, IdentityError> {
    if signals.len() != MEMBERSHIP_PUBLIC_INPUTS {
        return Err(IdentityError::InvalidProof(format!(
            "expected {} public signals, got {}",
            MEMBERSHIP_PUBLIC_INPUTS,
            signals.len()
        )));
    }

    signals
        .iter()
        .map(|s| {
            parse_signal(s).map_err(|_| {
                IdentityError::InvalidProof(format!("non-canonical public signal '{s}'"))
            })
        })
        .collect()
}

/// Runs the Groth16 pairing check.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidProof`] if the check cannot be
/// performed (wrong input count for the key).
pub fn verify_proof(
    vk: &VerifyingKey<Bn254>,
    proof: &Proof<Bn254>,
    public_inputs: &[Fr],
) -> Result<bool, IdentityError> {
    Groth16::<Bn254>::verify(vk, public_inputs, proof)
        .map_err(|e| IdentityError::InvalidProof(format!("pairing check error: {e}")))
}

/// A structurally valid verifying key for an empty two-input circuit.
/// Usable anywhere a key of the right shape is needed without a real
/// trusted setup (tests, local tooling); it verifies nothing.
pub fn generate_dummy_vkey() -> VerifyingKey<Bn254> {
    let g1 = G1Affine::generator();
    let g2 = G2Affine::generator();

    VerifyingKey {
        alpha_g1: g1,
        beta_g2: g2,
        gamma_g2: g2,
        delta_g2: g2,
        gamma_abc_g1: vec![g1; MEMBERSHIP_PUBLIC_INPUTS + 1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_g1_accepts_generator_and_identity() {
        assert!(validate_g1(&G1Affine::generator()).is_ok());
        assert!(validate_g1(&G1Affine::zero()).is_ok());
    }

    #[test]
    fn validate_g1_rejects_off_curve_point() {
        let bad = G1Affine::new_unchecked(Fq::from(1u64), Fq::from(1u64));
        assert!(validate_g1(&bad).is_err());
    }

    #[test]
    fn validate_g2_rejects_off_curve_point() {
        let x = Fq2::new(Fq::from(1u64), Fq::from(1u64));
        let y = Fq2::new(Fq::from(1u64), Fq::from(1u64));
        assert!(validate_g2(&G2Affine::new_unchecked(x, y)).is_err());
    }

    #[test]
    fn parse_proof_rejects_off_curve_pi_a() {
        let json =
            r#"{"pi_a":["1","1","1"],"pi_b":[["1","0"],["0","1"],["1","0"]],"pi_c":["1","1","1"]}"#;
        assert!(parse_proof(json).is_err());
    }

    #[test]
    fn parse_proof_rejects_short_arrays() {
        let json = r#"{"pi_a":["1"],"pi_b":[["1","0"]],"pi_c":["1","1"]}"#;
        assert!(parse_proof(json).is_err());
    }

    #[test]
    fn public_signals_must_be_exactly_two_and_canonical() {
        let one = "1".to_string();
        assert!(parse_public_signals(&[one.clone()]).is_err());
        assert!(parse_public_signals(&[one.clone(), one.clone(), one.clone()]).is_err());

        let parsed = parse_public_signals(&[one.clone(), "0x2a".to_string()]).unwrap();
        assert_eq!(parsed[0], Fr::from(1u64));
        assert_eq!(parsed[1], Fr::from(42u64));

        // r is not canonical.
        let modulus =
            "21888242871839275222246405745257275088548364400416034343698204186575808495617";
        assert!(parse_public_signals(&[one, modulus.to_string()]).is_err());
    }

    #[test]
    fn dummy_vkey_matches_membership_shape() {
        let vk = generate_dummy_vkey();
        validate_membership_vkey(&vk).unwrap();

        let mut wrong = vk;
        wrong.gamma_abc_g1.push(G1Affine::generator());
        assert!(validate_membership_vkey(&wrong).is_err());
    }

    #[test]
    fn fingerprint_is_stable_and_input_sensitive() {
        let a = vkey_fingerprint("{\"IC\":[]}");
        let b = vkey_fingerprint("{\"IC\":[]}");
        let c = vkey_fingerprint("{\"IC\":[ ]}");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
