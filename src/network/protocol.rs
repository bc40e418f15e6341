//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON object tagged by `"type"` (snake_case event name);
//! payload fields are camelCase.

use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::game::rules::{Move, Role, Winner};
use crate::game::state::{GameState, Participant, Turn};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Claim a free slot (after losing one to a reset).
    JoinGame,

    /// Ask the server to derive commitment parameters.
    GetCommitment(CommitmentRequest),

    /// Confirm the issued commitment.
    PlayerCommit(CommitRequest),

    /// Ask the server to verify the stored move.
    PlayerReveal(RevealRequest),

    /// Request a fresh game.
    ResetGame,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        #[serde(default)]
        timestamp: u64,
    },
}

/// `get_commitment` payload.
///
/// `move` and `salt` stay loosely typed so that a wrong type is reported as
/// a validation failure after authentication rather than a malformed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentRequest {
    /// Claimed role.
    pub player_id: Role,
    /// Move code, expected 0..=2.
    #[serde(rename = "move", default)]
    pub mv: Value,
    /// Salt; strings and numbers are accepted.
    #[serde(default)]
    pub salt: Value,
}

impl CommitmentRequest {
    /// Integer move code, if the client sent one.
    pub fn move_code(&self) -> Option<i64> {
        self.mv.as_i64()
    }

    /// Salt coerced to text.
    pub fn salt_text(&self) -> Option<String> {
        match &self.salt {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// `player_commit` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    /// Claimed role.
    pub player_id: Role,
    /// Commitment as the client received it.
    #[serde(default)]
    pub commitment: String,
}

/// `player_reveal` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealRequest {
    /// Claimed role.
    pub player_id: Role,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Slot assigned to this connection.
    PlayerAssigned(PlayerAssigned),

    /// Full game snapshot.
    GameStateUpdate(GameStateUpdate),

    /// Commitment parameters for the requester only.
    CommitmentGenerated(CommitmentGenerated),

    /// Game decided.
    GameResult(GameResult),

    /// The game was replaced; clients drop their role.
    GameResetSignal,

    /// A prover operation started or finished.
    LoadingUpdate(LoadingUpdate),

    /// Request rejected or failed.
    ErrorMessage(Notice),

    /// Advisory notice.
    InfoMessage(Notice),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server wall clock (ms since epoch).
        #[serde(rename = "serverTime")]
        server_time: u64,
    },
}

/// Slot assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAssigned {
    /// Assigned role.
    pub player_id: Role,
}

/// Snapshot broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateUpdate {
    /// Current game.
    pub game_state: GameStateView,
    /// Optional headline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Commitment parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentGenerated {
    /// Requesting role.
    pub player_id: Role,
    /// Canonical hex commitment.
    pub commitment: String,
    /// Committed move.
    #[serde(rename = "move")]
    pub mv: Move,
    /// Canonical hex salt.
    pub salt: String,
}

/// Final result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResult {
    /// Winner.
    pub winner: Winner,
    /// P1's revealed move.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p1_move: Option<Move>,
    /// P2's revealed move.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p2_move: Option<Move>,
    /// Summary line.
    pub message: String,
}

/// Prover activity indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingUpdate {
    /// A prover operation is running.
    pub is_loading: bool,
    /// What is running.
    pub message: String,
}

/// Text notice (`error_message`, `info_message`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    /// Human-readable text.
    pub message: String,
}

// =============================================================================
// STATE VIEW
// =============================================================================

/// Client-facing view of the game.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateView {
    /// Occupied slots.
    pub players: PlayersView,
    /// Current phase.
    pub current_turn: Turn,
    /// Event trail.
    pub message_log: Vec<String>,
    /// Decided winner.
    pub winner: Option<Winner>,
    /// A prover operation holds the gate.
    #[serde(rename = "isProcessingZK")]
    pub is_processing_zk: bool,
}

/// Slots by role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayersView {
    /// Player 1.
    #[serde(rename = "P1", default, skip_serializing_if = "Option::is_none")]
    pub p1: Option<ParticipantView>,
    /// Player 2.
    #[serde(rename = "P2", default, skip_serializing_if = "Option::is_none")]
    pub p2: Option<ParticipantView>,
}

/// Public part of a participant. Move and salt stay hidden until revealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    /// Role.
    pub id: Role,
    /// Commitment confirmed.
    pub has_committed: bool,
    /// Reveal verified.
    pub has_revealed: bool,
    /// Stored commitment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment: Option<String>,
    /// Reveal check result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_verified: Option<bool>,
    /// Move, once revealed.
    #[serde(rename = "move", default, skip_serializing_if = "Option::is_none")]
    pub mv: Option<Move>,
}

impl From<&Participant> for ParticipantView {
    fn from(p: &Participant) -> Self {
        let sealed = p.sealed();
        Self {
            id: p.role,
            has_committed: p.has_committed(),
            has_revealed: p.has_revealed(),
            commitment: sealed.map(|s| s.commitment.clone()),
            proof_verified: p.proof_verified(),
            mv: sealed.filter(|_| p.has_revealed()).map(|s| s.mv),
        }
    }
}

impl GameStateView {
    /// Snapshot `state`; `zk_busy` mirrors the gate.
    pub fn new(state: &GameState, zk_busy: bool) -> Self {
        Self {
            players: PlayersView {
                p1: state.participant(Role::P1).map(ParticipantView::from),
                p2: state.participant(Role::P2).map(ParticipantView::from),
            },
            current_turn: state.turn(),
            message_log: state.log().to_vec(),
            winner: state.winner(),
            is_processing_zk: zk_busy,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// `error_message`.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::ErrorMessage(Notice { message: message.into() })
    }

    /// `info_message`.
    pub fn info(message: impl Into<String>) -> Self {
        ServerMessage::InfoMessage(Notice { message: message.into() })
    }

    /// `loading_update`.
    pub fn loading(is_loading: bool, message: impl Into<String>) -> Self {
        ServerMessage::LoadingUpdate(LoadingUpdate {
            is_loading,
            message: message.into(),
        })
    }

    /// `game_state_update`.
    pub fn state(game_state: GameStateView, message: Option<String>) -> Self {
        ServerMessage::GameStateUpdate(GameStateUpdate { game_state, message })
    }
}
