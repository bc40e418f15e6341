//! Reset Debouncing
//!
//! Both players tend to press "reset" at the same moment, and a disconnect
//! can race a user reset. The debouncer turns a burst of requests into a
//! single reset followed by a cooldown window.

use std::time::Duration;
use tokio::time::Instant;

/// Default cooldown after an accepted reset.
pub const DEFAULT_RESET_COOLDOWN: Duration = Duration::from_millis(2000);

/// How a reset request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetDecision {
    /// Perform the reset now; the cooldown is armed.
    Accepted,
    /// A reset just happened; treat this one as satisfied.
    Coalesced,
    /// Not allowed in the current phase.
    Refused,
}

/// Cooldown tracker for session resets.
#[derive(Debug, Clone)]
pub struct ResetDebouncer {
    cooldown: Duration,
    cooling_until: Option<Instant>,
}

impl Default for ResetDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_RESET_COOLDOWN)
    }
}

impl ResetDebouncer {
    /// Create a debouncer with the given cooldown.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            cooling_until: None,
        }
    }

    /// Whether a recent reset is still cooling down.
    pub fn is_cooling(&self) -> bool {
        self.cooling_until
            .is_some_and(|deadline| Instant::now() < deadline)
    }

    /// User-requested reset, gated on `eligible` (derived from the game phase).
    pub fn request(&mut self, eligible: bool) -> ResetDecision {
        if self.is_cooling() {
            return ResetDecision::Coalesced;
        }
        if !eligible {
            return ResetDecision::Refused;
        }
        self.arm();
        ResetDecision::Accepted
    }

    /// Disconnect-triggered reset. Skips eligibility, honours the cooldown.
    pub fn force(&mut self) -> ResetDecision {
        if self.is_cooling() {
            return ResetDecision::Coalesced;
        }
        self.arm();
        ResetDecision::Accepted
    }

    fn arm(&mut self) {
        self.cooling_until = Some(Instant::now() + self.cooldown);
    }
}
