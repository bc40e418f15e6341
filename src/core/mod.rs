//! Core primitives.
//!
//! Field arithmetic shared by the prover bridge and the mock prover.

pub mod field;

// Re-export core types
pub use field::{
    canonicalize_salt, is_hex_literal, reduce_field_literal, reduce_hex_literal, to_hex,
    FieldError, FIELD_MODULUS,
};
