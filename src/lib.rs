//! # ZK Rock-Paper-Scissors Server
//!
//! Two-player commit-reveal rock-paper-scissors. Each move is hidden behind a
//! commitment derived by a Noir circuit and later opened by producing a
//! witness for a second circuit, both through the `nargo` toolchain.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ZK RPS SERVER                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Field primitives                          │
//! │  └── field.rs    - BN254 salt/literal canonicalization       │
//! │                                                              │
//! │  game/           - Game logic (transport-free)               │
//! │  ├── rules.rs    - Roles, moves, winner table                │
//! │  ├── state.rs    - Session state machine                     │
//! │  └── reset.rs    - Reset debouncing                          │
//! │                                                              │
//! │  prover/         - Zero-knowledge toolchain bridge           │
//! │  ├── nargo.rs    - nargo CLI (Prover.toml, witnesses)        │
//! │  ├── mock.rs     - In-process prover                         │
//! │  └── gate.rs     - Single in-flight operation gate           │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  └── session.rs  - Game session orchestration                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Guarantee
//!
//! All game mutations happen under one lock, and at most one prover
//! operation is in flight. A prover result is applied only to the game
//! generation it was started in; anything else is discarded.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod prover;

// Re-export commonly used types
pub use game::rules::{Move, Role, Winner};
pub use game::state::{ConnectionId, GameError, GameState, Turn};
pub use network::{GameServer, GameSession, ServerConfig, SessionConfig};
pub use prover::{MockProver, NargoProver, ProverBridge, ProverConfig, ProverError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
