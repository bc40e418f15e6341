//! Game Logic Module
//!
//! Transport-free game rules and session bookkeeping.
//!
//! ## Module Structure
//!
//! - `rules`: Roles, moves, winner table
//! - `state`: Session state machine (slots, turns, commit/reveal)
//! - `reset`: Reset debouncing with cooldown

pub mod rules;
pub mod state;
pub mod reset;

// Re-export key types
pub use rules::{determine_winner, Move, Role, Winner};
pub use state::{
    CommitmentTicket, ConnectionId, GameError, GameState, Participant, RevealOutcome,
    RevealTicket, SealedMove, Turn, Verdict,
};
pub use reset::{ResetDebouncer, ResetDecision, DEFAULT_RESET_COOLDOWN};
