//! Prover Bridge Module
//!
//! Everything that talks to the zero-knowledge toolchain.
//!
//! ## Module Structure
//!
//! - `nargo`: Bridge to the `nargo` executable (parameter files, witnesses)
//! - `mock`: In-process prover for development and tests
//! - `gate`: Single-permit gate serializing prover operations

pub mod gate;
pub mod mock;
pub mod nargo;

use async_trait::async_trait;

use crate::core::field::FieldError;
use crate::game::rules::Move;
use crate::game::state::GameError;

pub use gate::{ZkGate, ZkPermit};
pub use mock::MockProver;
pub use nargo::{NargoProver, ProverConfig};

/// Prover failures that are not a plain "proof rejected".
#[derive(Debug, thiserror::Error)]
pub enum ProverError {
    /// The toolchain exited non-zero while deriving a commitment.
    #[error("prover exited with {status}: {stderr}")]
    Invocation {
        /// Exit status description.
        status: String,
        /// Captured stderr (trimmed).
        stderr: String,
    },

    /// The toolchain did not finish in time and was killed.
    #[error("prover timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// No field element could be extracted from the output.
    #[error("no field element in prover output: {0}")]
    OutputParse(String),

    /// A printed field element was malformed.
    #[error("malformed field element: {0}")]
    Field(#[from] FieldError),

    /// A circuit directory does not exist.
    #[error("circuit directory not found: {}", .0.display())]
    MissingCircuit(std::path::PathBuf),

    /// Filesystem or process-spawn failure.
    #[error("prover I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProverError> for GameError {
    fn from(err: ProverError) -> Self {
        match err {
            ProverError::OutputParse(_) | ProverError::Field(_) => GameError::OutputParse(err.to_string()),
            _ => GameError::ProverInvocation(err.to_string()),
        }
    }
}

/// The two circuit operations the game needs.
#[async_trait]
pub trait ProverBridge: Send + Sync {
    /// Derive the canonical hex commitment to `(mv, salt)`.
    async fn derive_commitment(&self, mv: Move, salt: &str) -> Result<String, ProverError>;

    /// Check that `(mv, salt)` opens `commitment`.
    ///
    /// `Ok(false)` is a rejected proof; `Err` is an environment fault.
    async fn verify_reveal(&self, mv: Move, salt: &str, commitment: &str) -> Result<bool, ProverError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}
