//! Session State Machine
//!
//! The single game aggregate: slot assignment, turn sequencing,
//! commit/reveal bookkeeping and winner determination. Every mutation of
//! shared game state goes through a method on [`GameState`].
//!
//! Prover-backed actions are split in two halves. `begin_*` validates the
//! request and hands out a ticket; the caller runs the prover without
//! holding the state, then `complete_*` applies the result only if the
//! ticket still matches the live game (same epoch, same connection).

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};
use tracing::warn;

use crate::core::field::{canonicalize_salt, is_hex_literal};
use crate::game::rules::{determine_winner, Move, Role, Winner};

// =============================================================================
// CONNECTION ID
// =============================================================================

/// Opaque identity of one transport connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub uuid::Uuid);

impl ConnectionId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// TURN
// =============================================================================

/// Game phase. Advances strictly forward until a reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Turn {
    /// Waiting for P1's commitment.
    #[serde(rename = "P1_COMMIT")]
    P1Commit,
    /// Waiting for P2's commitment.
    #[serde(rename = "P2_COMMIT")]
    P2Commit,
    /// Waiting for P1's reveal.
    #[serde(rename = "P1_REVEAL")]
    P1Reveal,
    /// Waiting for P2's reveal.
    #[serde(rename = "P2_REVEAL")]
    P2Reveal,
    /// Terminal.
    #[serde(rename = "GAME_OVER")]
    GameOver,
}

impl Turn {
    /// Commit phase of `role`.
    pub fn commit_for(role: Role) -> Turn {
        match role {
            Role::P1 => Turn::P1Commit,
            Role::P2 => Turn::P2Commit,
        }
    }

    /// Reveal phase of `role`.
    pub fn reveal_for(role: Role) -> Turn {
        match role {
            Role::P1 => Turn::P1Reveal,
            Role::P2 => Turn::P2Reveal,
        }
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Turn::P1Commit => "P1_COMMIT",
            Turn::P2Commit => "P2_COMMIT",
            Turn::P1Reveal => "P1_REVEAL",
            Turn::P2Reveal => "P2_REVEAL",
            Turn::GameOver => "GAME_OVER",
        };
        f.write_str(name)
    }
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// Move, salt and commitment of one player. Set together, never changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedMove {
    /// Hidden move.
    pub mv: Move,
    /// Canonical hex salt.
    pub salt: String,
    /// Canonical hex commitment derived by the prover.
    pub commitment: String,
}

/// A player occupying a slot.
#[derive(Clone, Debug)]
pub struct Participant {
    /// Slot.
    pub role: Role,
    /// Connection allowed to act for this role.
    pub connection: ConnectionId,
    sealed: Option<SealedMove>,
    has_committed: bool,
    has_revealed: bool,
    proof_verified: Option<bool>,
}

impl Participant {
    fn new(role: Role, connection: ConnectionId) -> Self {
        Self {
            role,
            connection,
            sealed: None,
            has_committed: false,
            has_revealed: false,
            proof_verified: None,
        }
    }

    /// Stored move/salt/commitment, if issued.
    pub fn sealed(&self) -> Option<&SealedMove> {
        self.sealed.as_ref()
    }

    /// Confirmed commitment.
    pub fn has_committed(&self) -> bool {
        self.has_committed
    }

    /// Reveal proof passed.
    pub fn has_revealed(&self) -> bool {
        self.has_revealed
    }

    /// Result of the reveal check, once run.
    pub fn proof_verified(&self) -> Option<bool> {
        self.proof_verified
    }
}

// =============================================================================
// TICKETS & OUTCOMES
// =============================================================================

/// Validated commitment request, carried across the prover call.
#[derive(Clone, Debug)]
pub struct CommitmentTicket {
    /// Game generation the request was accepted in.
    pub epoch: u64,
    /// Requesting role.
    pub role: Role,
    /// Requesting connection.
    pub connection: ConnectionId,
    /// Validated move.
    pub mv: Move,
    /// Canonical salt.
    pub salt: String,
}

/// Validated reveal request with the server-stored values to prove.
#[derive(Clone, Debug)]
pub struct RevealTicket {
    /// Game generation the request was accepted in.
    pub epoch: u64,
    /// Revealing role.
    pub role: Role,
    /// Requesting connection.
    pub connection: ConnectionId,
    /// Values stored at commitment time.
    pub sealed: SealedMove,
}

/// Final result of a decided game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    /// Winner.
    pub winner: Winner,
    /// P1's move, if revealed.
    pub p1_move: Option<Move>,
    /// P2's move, if revealed.
    pub p2_move: Option<Move>,
    /// Human-readable summary.
    pub message: String,
}

/// What a completed reveal did to the game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RevealOutcome {
    /// P1 verified; P2 reveals next.
    AwaitingOpponent,
    /// Game over with a winner from verified moves (or a default win).
    Decided(Verdict),
    /// Game over but not both proofs verified; no winner.
    Unresolved,
    /// Proof rejected; game over, the other committed role (if any) wins.
    Rejected {
        /// Winner by forfeit.
        winner: Option<Role>,
    },
}

// =============================================================================
// ERRORS
// =============================================================================

/// Rejections and failures of game operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// Both slots occupied.
    #[error("Game is full. Please try again later.")]
    GameFull,

    /// Connection does not own the claimed role.
    #[error("Role authentication failed for {role}. Your game session might be outdated.")]
    Authentication {
        /// Claimed role.
        role: Role,
    },

    /// Action not valid in the current phase or participant state.
    #[error("{reason} (current phase: {turn})")]
    TurnState {
        /// Current phase.
        turn: Turn,
        /// Unmet condition.
        reason: String,
    },

    /// Malformed move or salt.
    #[error("Invalid move/salt: {0}")]
    Validation(String),

    /// A prover operation is already running.
    #[error("Server is busy with a ZK operation. Please wait.")]
    ServerBusy,

    /// External prover failed or timed out.
    #[error("Prover invocation failed: {0}")]
    ProverInvocation(String),

    /// Prover output had no field element.
    #[error("Could not parse prover output: {0}")]
    OutputParse(String),

    /// Reveal without stored move/salt/commitment.
    #[error("Missing stored move, salt or commitment for {role}")]
    MissingPlayerData {
        /// Affected role.
        role: Role,
    },

    /// The game was reset or the player left while a prover call ran.
    #[error("The game changed while the ZK operation was running; result discarded")]
    SessionChanged,
}

// =============================================================================
// GAME STATE
// =============================================================================

const START_MESSAGE: &str = "Game reset. Player 1, please choose your move and salt.";

/// The process-wide game aggregate.
#[derive(Clone, Debug)]
pub struct GameState {
    epoch: u64,
    slots: BTreeMap<Role, Participant>,
    turn: Turn,
    log: Vec<String>,
    winner: Option<Winner>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    /// Initial game.
    pub fn new() -> Self {
        Self::with_epoch(0)
    }

    fn with_epoch(epoch: u64) -> Self {
        Self {
            epoch,
            slots: BTreeMap::new(),
            turn: Turn::P1Commit,
            log: vec![START_MESSAGE.to_string()],
            winner: None,
        }
    }

    /// Replace the whole game with a fresh one of the next epoch.
    pub fn reset(&mut self) {
        *self = Self::with_epoch(self.epoch + 1);
    }

    /// Generation counter, bumped by every reset.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current phase.
    pub fn turn(&self) -> Turn {
        self.turn
    }

    /// Decided winner.
    pub fn winner(&self) -> Option<Winner> {
        self.winner
    }

    /// Event trail, oldest first.
    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Append to the event trail.
    pub fn note(&mut self, message: impl Into<String>) {
        self.log.push(message.into());
    }

    /// Participant in `role`.
    pub fn participant(&self, role: Role) -> Option<&Participant> {
        self.slots.get(&role)
    }

    /// Role held by `connection`.
    pub fn role_of(&self, connection: ConnectionId) -> Option<Role> {
        self.slots
            .values()
            .find(|p| p.connection == connection)
            .map(|p| p.role)
    }

    fn has_committed(&self, role: Role) -> bool {
        self.slots.get(&role).is_some_and(|p| p.has_committed)
    }

    /// Whether a user-requested reset may replace this game.
    pub fn reset_eligible(&self) -> bool {
        self.turn == Turn::GameOver
            || (self.turn == Turn::P1Commit
                && !self.has_committed(Role::P1)
                && !self.has_committed(Role::P2))
    }

    // -------------------------------------------------------------------------
    // Slots
    // -------------------------------------------------------------------------

    /// Put `connection` into the first free slot.
    pub fn assign(&mut self, connection: ConnectionId) -> Result<Role, GameError> {
        let role = Role::ALL
            .into_iter()
            .find(|r| !self.slots.contains_key(r))
            .ok_or(GameError::GameFull)?;

        self.slots.insert(role, Participant::new(role, connection));
        self.note(format!("{} joined. Current turn: {}", role, self.turn));

        // P1 may have committed while waiting alone.
        if role == Role::P2 && self.turn == Turn::P1Commit && self.has_committed(Role::P1) {
            self.turn = Turn::P2Commit;
            self.note("P2 to commit.");
        }
        Ok(role)
    }

    /// Remove the participant owned by `connection`.
    pub fn vacate(&mut self, connection: ConnectionId) -> Option<Role> {
        let role = self.role_of(connection)?;
        self.slots.remove(&role);
        self.note(format!("{} disconnected.", role));
        Some(role)
    }

    /// Check that `connection` owns `role`.
    pub fn authenticate(&self, role: Role, connection: ConnectionId) -> Result<&Participant, GameError> {
        match self.slots.get(&role) {
            Some(p) if p.connection == connection => Ok(p),
            _ => Err(GameError::Authentication { role }),
        }
    }

    fn turn_error(&self, reason: impl Into<String>) -> GameError {
        GameError::TurnState {
            turn: self.turn,
            reason: reason.into(),
        }
    }

    /// Ticket still refers to the live game and owner.
    fn ticket_owner(&mut self, epoch: u64, role: Role, connection: ConnectionId) -> Result<&mut Participant, GameError> {
        if epoch != self.epoch {
            return Err(GameError::SessionChanged);
        }
        match self.slots.get_mut(&role) {
            Some(p) if p.connection == connection => Ok(p),
            _ => Err(GameError::SessionChanged),
        }
    }

    // -------------------------------------------------------------------------
    // Commit
    // -------------------------------------------------------------------------

    /// Validate a commitment-parameter request.
    pub fn begin_commitment(
        &self,
        role: Role,
        connection: ConnectionId,
        mv: Option<i64>,
        salt: Option<&str>,
    ) -> Result<CommitmentTicket, GameError> {
        let participant = self.authenticate(role, connection)?;

        if self.turn != Turn::commit_for(role) {
            return Err(self.turn_error(format!("Not {}'s turn to commit", role)));
        }
        if participant.has_committed {
            return Err(self.turn_error(format!("{} has already committed", role)));
        }
        if participant.sealed.is_some() {
            return Err(self.turn_error(format!(
                "Commitment parameters were already issued to {}; confirm them",
                role
            )));
        }

        let mv = mv
            .ok_or_else(|| GameError::Validation("move must be a number".to_string()))
            .and_then(|code| Move::try_from(code).map_err(GameError::Validation))?;
        let salt = match salt {
            Some(s) if !s.trim().is_empty() => s,
            _ => return Err(GameError::Validation("salt must not be empty".to_string())),
        };
        let salt = canonicalize_salt(salt);
        if !is_hex_literal(&salt) {
            return Err(GameError::Validation(format!("salt {} is not a hex value", salt)));
        }

        Ok(CommitmentTicket {
            epoch: self.epoch,
            role,
            connection,
            mv,
            salt,
        })
    }

    /// Store the derived commitment for the ticket's participant.
    pub fn complete_commitment(&mut self, ticket: &CommitmentTicket, commitment: String) -> Result<(), GameError> {
        let participant = self.ticket_owner(ticket.epoch, ticket.role, ticket.connection)?;
        if participant.sealed.is_some() || participant.has_committed {
            return Err(GameError::SessionChanged);
        }

        participant.sealed = Some(SealedMove {
            mv: ticket.mv,
            salt: ticket.salt.clone(),
            commitment,
        });
        self.note(format!("{} received commitment parameters. Confirm commit.", ticket.role));
        Ok(())
    }

    /// Confirm the stored commitment. The client's echo is advisory only.
    pub fn confirm_commit(
        &mut self,
        role: Role,
        connection: ConnectionId,
        client_commitment: &str,
    ) -> Result<Turn, GameError> {
        let participant = self.authenticate(role, connection)?;
        if self.turn != Turn::commit_for(role) {
            return Err(self.turn_error(format!("Not {}'s turn to commit", role)));
        }
        if participant.has_committed {
            return Err(self.turn_error(format!("{} has already committed", role)));
        }
        let stored = participant
            .sealed
            .as_ref()
            .ok_or(GameError::MissingPlayerData { role })?;

        if stored.commitment != client_commitment {
            warn!(
                %role,
                stored = %stored.commitment,
                client = client_commitment,
                "client/server commitment mismatch; keeping server value"
            );
        }

        if let Some(p) = self.slots.get_mut(&role) {
            p.has_committed = true;
        }
        self.note(format!("{} committed.", role));

        match role {
            Role::P1 if self.slots.contains_key(&Role::P2) => {
                self.turn = Turn::P2Commit;
                self.note("P2 to commit.");
            }
            Role::P1 => {
                self.note("P1 committed. Waiting for P2 to join and commit.");
            }
            Role::P2 => {
                self.turn = Turn::P1Reveal;
                self.note("P1 to reveal.");
            }
        }
        Ok(self.turn)
    }

    // -------------------------------------------------------------------------
    // Reveal
    // -------------------------------------------------------------------------

    /// Validate a reveal request and take the server-stored values.
    pub fn begin_reveal(&self, role: Role, connection: ConnectionId) -> Result<RevealTicket, GameError> {
        let participant = self.authenticate(role, connection)?;

        if self.turn != Turn::reveal_for(role) {
            return Err(self.turn_error(format!("Not {}'s turn to reveal", role)));
        }
        if !participant.has_committed {
            return Err(self.turn_error(format!("{} has not committed", role)));
        }
        if participant.has_revealed {
            return Err(self.turn_error(format!("{} has already revealed", role)));
        }
        let sealed = participant
            .sealed
            .clone()
            .ok_or(GameError::MissingPlayerData { role })?;

        Ok(RevealTicket {
            epoch: self.epoch,
            role,
            connection,
            sealed,
        })
    }

    /// Apply a verification result.
    pub fn complete_reveal(&mut self, ticket: &RevealTicket, verified: bool) -> Result<RevealOutcome, GameError> {
        if self.turn != Turn::reveal_for(ticket.role) {
            return Err(GameError::SessionChanged);
        }
        let role = ticket.role;
        let participant = self.ticket_owner(ticket.epoch, role, ticket.connection)?;

        if !verified {
            participant.proof_verified = Some(false);
            self.turn = Turn::GameOver;
            self.note(format!("ZK proof verification failed for {}.", role));

            let other = role.other();
            let winner = self.has_committed(other).then_some(other);
            if let Some(w) = winner {
                self.winner = Some(w.into());
                self.note(format!("{} wins: {}'s proof was rejected.", w, role));
            }
            return Ok(RevealOutcome::Rejected { winner });
        }

        participant.has_revealed = true;
        participant.proof_verified = Some(true);
        let mv = ticket.sealed.mv;
        self.note(format!("{} revealed move {}. ZK proof verified!", role, mv.as_u8()));

        match role {
            Role::P1 if self.has_committed(Role::P2) => {
                self.turn = Turn::P2Reveal;
                self.note("P2 to reveal.");
                Ok(RevealOutcome::AwaitingOpponent)
            }
            Role::P1 => {
                self.turn = Turn::GameOver;
                self.winner = Some(Winner::P1);
                self.note("P2 has not committed or is disconnected. P1 wins by default.");
                let message = "P2 did not commit. P1 wins.".to_string();
                Ok(RevealOutcome::Decided(Verdict {
                    winner: Winner::P1,
                    p1_move: Some(mv),
                    p2_move: None,
                    message,
                }))
            }
            Role::P2 => {
                self.turn = Turn::GameOver;
                let verified_move = |p: Option<&Participant>| {
                    p.filter(|p| p.proof_verified == Some(true))
                        .and_then(|p| p.sealed.as_ref())
                        .map(|s| s.mv)
                };
                match (
                    verified_move(self.slots.get(&Role::P1)),
                    verified_move(self.slots.get(&Role::P2)),
                ) {
                    (Some(p1), Some(p2)) => {
                        let winner = determine_winner(p1, p2);
                        self.winner = Some(winner);
                        let message = format!(
                            "Game Over! P1 played move {}, P2 played move {}. Winner: {}",
                            p1.as_u8(),
                            p2.as_u8(),
                            winner
                        );
                        self.note(message.clone());
                        Ok(RevealOutcome::Decided(Verdict {
                            winner,
                            p1_move: Some(p1),
                            p2_move: Some(p2),
                            message,
                        }))
                    }
                    _ => {
                        self.note("Game Over, but one or more proofs failed verification.");
                        Ok(RevealOutcome::Unresolved)
                    }
                }
            }
        }
    }
}
