//! ZK operation gate.
//!
//! At most one prover operation runs at a time across the whole session.
//! Acquisition never waits: a held gate means "server busy".

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Non-blocking single-permit gate.
#[derive(Debug, Clone)]
pub struct ZkGate {
    semaphore: Arc<Semaphore>,
}

/// Proof of holding the gate. Dropping it releases the gate.
#[derive(Debug)]
pub struct ZkPermit {
    _permit: OwnedSemaphorePermit,
}

impl ZkPermit {
    /// Release explicitly.
    pub fn release(self) {}
}

impl Default for ZkGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ZkGate {
    /// Open gate.
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the gate if nobody holds it.
    pub fn try_acquire(&self) -> Option<ZkPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| ZkPermit { _permit: permit })
    }

    /// Whether an operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}
