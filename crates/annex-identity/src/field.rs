//! Strict field-element encoding and parsing.
//!
//! Everything crossing the wire is either a 64-char lower-case hex string
//! or a decimal string; both must denote a canonical value in `[0, r)`
//! for the BN254 scalar field. Values that would be reduced modulo `r`
//! are rejected rather than silently wrapped.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;

use crate::IdentityError;

/// Encodes a field element as 64-char lower-case big-endian hex.
pub fn fr_to_hex(value: Fr) -> String {
    hex::encode(value.into_bigint().to_bytes_be())
}

/// The field modulus `r` as a big integer.
fn modulus() -> BigUint {
    BigUint::from_bytes_be(&Fr::MODULUS.to_bytes_be())
}

/// Parses a 64-char hex string into a field element, rejecting values
/// outside `[0, r)`.
///
/// Returns the element together with its normalised (lower-case) hex
/// form, which is the representation stored and hashed everywhere else.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidInput`] for wrong length, non-hex
/// characters, or a value `>= r`.
pub fn parse_field_hex(input: &str) -> Result<(Fr, String), IdentityError> {
    if input.len() != 64 || !input.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IdentityError::InvalidInput(format!(
            "expected 64 hex characters, got '{input}'"
        )));
    }

    let normalized = input.to_ascii_lowercase();
    let bytes = hex::decode(&normalized)
        .map_err(|_| IdentityError::InvalidInput(format!("invalid hex: '{input}'")))?;

    let value = BigUint::from_bytes_be(&bytes);
    if value >= modulus() {
        return Err(IdentityError::InvalidInput(
            "value is not a canonical field element".to_string(),
        ));
    }

    Ok((Fr::from_be_bytes_mod_order(&bytes), normalized))
}

/// Parses a decimal string into a field element, rejecting values `>= r`.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidInput`] for empty input, non-digit
/// characters, or an out-of-range value.
pub fn parse_field_dec(input: &str) -> Result<Fr, IdentityError> {
    if input.is_empty() || !input.chars().all(|c| c.is_ascii_digit()) {
        return Err(IdentityError::InvalidInput(format!(
            "expected decimal digits, got '{input}'"
        )));
    }

    let value: BigUint = input
        .parse()
        .map_err(|_| IdentityError::InvalidInput(format!("invalid decimal: '{input}'")))?;
    if value >= modulus() {
        return Err(IdentityError::InvalidInput(
            "value is not a canonical field element".to_string(),
        ));
    }

    Ok(Fr::from_be_bytes_mod_order(&value.to_bytes_be()))
}

/// Parses a public signal, which snarkjs emits as a decimal string but
/// clients may also send as `0x`-prefixed hex.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidInput`] if the signal is neither a
/// canonical decimal nor a canonical hex representation of a value in
/// `[0, r)`.
pub fn parse_signal(input: &str) -> Result<Fr, IdentityError> {
    if let Some(stripped) = input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        if stripped.is_empty()
            || stripped.len() > 64
            || !stripped.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(IdentityError::InvalidInput(format!(
                "invalid hex signal: '{input}'"
            )));
        }
        // Left-pad to the canonical 64-char form.
        let padded = format!("{stripped:0>64}");
        let (value, _) = parse_field_hex(&padded)?;
        return Ok(value);
    }

    parse_field_dec(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// r - 1, the largest canonical element.
    const MAX_CANONICAL_DEC: &str =
        "21888242871839275222246405745257275088548364400416034343698204186575808495616";
    /// r itself, the smallest rejected value.
    const MODULUS_DEC: &str =
        "21888242871839275222246405745257275088548364400416034343698204186575808495617";

    #[test]
    fn hex_round_trip() {
        let value = Fr::from(123456789u64);
        let hex = fr_to_hex(value);
        assert_eq!(hex.len(), 64);
        let (parsed, normalized) = parse_field_hex(&hex).unwrap();
        assert_eq!(parsed, value);
        assert_eq!(normalized, hex);
    }

    #[test]
    fn uppercase_hex_is_normalized() {
        let hex = fr_to_hex(Fr::from(0xabcdefu64)).to_ascii_uppercase();
        let (_, normalized) = parse_field_hex(&hex).unwrap();
        assert_eq!(normalized, hex.to_ascii_lowercase());
    }

    #[test]
    fn rejects_wrong_length_and_non_hex() {
        assert!(parse_field_hex("abcd").is_err());
        let mut bad = "z".repeat(64);
        assert!(parse_field_hex(&bad).is_err());
        bad = "0".repeat(63);
        assert!(parse_field_hex(&bad).is_err());
    }

    #[test]
    fn rejects_non_canonical_values() {
        assert!(parse_field_dec(MAX_CANONICAL_DEC).is_ok());
        assert!(parse_field_dec(MODULUS_DEC).is_err());

        // The modulus in hex must also be rejected.
        let modulus_hex = hex::encode(Fr::MODULUS.to_bytes_be());
        assert!(parse_field_hex(&modulus_hex).is_err());
    }

    #[test]
    fn decimal_and_hex_signals_agree() {
        let from_dec = parse_signal("123456789").unwrap();
        let from_hex = parse_signal("0x75bcd15").unwrap();
        assert_eq!(from_dec, from_hex);
    }

    #[test]
    fn rejects_garbage_signals() {
        assert!(parse_signal("").is_err());
        assert!(parse_signal("0x").is_err());
        assert!(parse_signal("12a").is_err());
        assert!(parse_signal("-5").is_err());
        assert!(parse_signal(MODULUS_DEC).is_err());
    }
}
