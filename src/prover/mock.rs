//! In-process prover.
//!
//! Commitments are SHA-256(move || salt) reduced into the BN254 field, so
//! they have the same shape as real circuit output. Verification recomputes
//! the commitment. Never touches the filesystem.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use ark_bn254::Fr;
use ark_ff::PrimeField;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::field::to_hex;
use crate::game::rules::Move;
use crate::prover::{ProverBridge, ProverError};

/// Deterministic prover double with failure injection.
#[derive(Debug, Default)]
pub struct MockProver {
    delay: Option<Duration>,
    reject_reveals: AtomicBool,
    fail_invocations: AtomicBool,
    calls: AtomicUsize,
}

impl MockProver {
    /// Prover that answers immediately and honestly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every reveal check return `false`.
    pub fn set_reject_reveals(&self, reject: bool) {
        self.reject_reveals.store(reject, Ordering::SeqCst);
    }

    /// Make every call fail as if the toolchain exited non-zero.
    pub fn set_fail_invocations(&self, fail: bool) {
        self.fail_invocations.store(fail, Ordering::SeqCst);
    }

    /// Number of prover calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The commitment this prover derives for `(mv, salt)`.
    pub fn commitment_for(mv: Move, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update([mv.as_u8()]);
        hasher.update(salt.as_bytes());
        to_hex(Fr::from_be_bytes_mod_order(&hasher.finalize()))
    }

    async fn enter(&self) -> Result<(), ProverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_invocations.load(Ordering::SeqCst) {
            return Err(ProverError::Invocation {
                status: "exit status: 1".to_string(),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ProverBridge for MockProver {
    async fn derive_commitment(&self, mv: Move, salt: &str) -> Result<String, ProverError> {
        self.enter().await?;
        let commitment = Self::commitment_for(mv, salt);
        debug!(%mv, salt, %commitment, "mock commitment derived");
        Ok(commitment)
    }

    async fn verify_reveal(&self, mv: Move, salt: &str, commitment: &str) -> Result<bool, ProverError> {
        self.enter().await?;
        if self.reject_reveals.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(Self::commitment_for(mv, salt) == commitment)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
