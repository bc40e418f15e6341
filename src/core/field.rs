//! BN254 Field Codec
//!
//! Canonical hex encoding for values crossing the prover boundary.
//! Salts are normalized to `0x`-prefixed strings; field literals printed by
//! the toolchain (signed decimal or hex) are reduced into `[0, p)` and
//! rendered as lowercase `0x` hex.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use thiserror::Error;
use tracing::warn;

/// BN254 scalar field modulus (decimal).
pub const FIELD_MODULUS: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Field literal parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// Literal has no digits.
    #[error("empty field literal")]
    Empty,
    /// Literal contains a character that is not a digit of its radix.
    #[error("invalid digit {digit:?} in field literal {literal:?}")]
    InvalidDigit {
        /// Offending character.
        digit: char,
        /// Full literal as received.
        literal: String,
    },
}

// =============================================================================
// SALTS
// =============================================================================

/// Normalize a salt: trim whitespace and prefix `0x` when absent.
///
/// Never fails. Non-hex characters only produce a warning, so callers that
/// hand the salt to the prover must check [`is_hex_literal`] first.
pub fn canonicalize_salt(input: &str) -> String {
    let trimmed = input.trim();
    let salt = if trimmed.starts_with("0x") {
        trimmed.to_string()
    } else {
        format!("0x{}", trimmed)
    };

    if !is_hex_body(&salt[2..]) {
        warn!(input, salt = %salt, "salt contains non-hex characters");
    }
    salt
}

/// `true` when `value` is `0x` followed by one or more hex digits.
pub fn is_hex_literal(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .map(|body| !body.is_empty() && is_hex_body(body))
        .unwrap_or(false)
}

fn is_hex_body(body: &str) -> bool {
    body.bytes().all(|b| b.is_ascii_hexdigit())
}

// =============================================================================
// FIELD LITERALS
// =============================================================================

/// Reduce a signed decimal literal of any size into the field and render it
/// as canonical hex.
///
/// Negative values wrap around the modulus, so `-1` becomes `p - 1`.
pub fn reduce_field_literal(literal: &str) -> Result<String, FieldError> {
    let trimmed = literal.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if digits.is_empty() {
        return Err(FieldError::Empty);
    }

    let ten = Fr::from(10u64);
    let mut value = Fr::from(0u64);
    for c in digits.chars() {
        let digit = c.to_digit(10).ok_or_else(|| FieldError::InvalidDigit {
            digit: c,
            literal: literal.to_string(),
        })?;
        value = value * ten + Fr::from(u64::from(digit));
    }

    Ok(to_hex(if negative { -value } else { value }))
}

/// Reduce a `0x` hex literal into the field and render it as canonical hex.
pub fn reduce_hex_literal(literal: &str) -> Result<String, FieldError> {
    let trimmed = literal.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if body.is_empty() {
        return Err(FieldError::Empty);
    }
    if let Some(c) = body.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(FieldError::InvalidDigit {
            digit: c,
            literal: literal.to_string(),
        });
    }

    let padded = if body.len() % 2 == 1 {
        format!("0{}", body)
    } else {
        body.to_string()
    };
    let bytes = hex::decode(&padded).map_err(|_| FieldError::InvalidDigit {
        digit: '?',
        literal: literal.to_string(),
    })?;
    Ok(to_hex(Fr::from_be_bytes_mod_order(&bytes)))
}

/// Render a field element as lowercase `0x` hex without leading zeros.
pub fn to_hex(value: Fr) -> String {
    let encoded = hex::encode(value.into_bigint().to_bytes_be());
    let significant = encoded.trim_start_matches('0');
    if significant.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{}", significant)
    }
}
