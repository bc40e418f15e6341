//! Network Layer
//!
//! WebSocket server for the two game participants.
//! All game rules live in `game/`; this layer routes, serializes and
//! brackets prover calls.

pub mod protocol;
pub mod session;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, GameStateView, ParticipantView};
pub use session::{GameSession, Outbox, SessionConfig};
pub use server::{GameServer, ServerConfig, GameServerError};
