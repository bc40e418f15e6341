//! Roles, moves and the winner table.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Player slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// First player, commits and reveals first.
    P1,
    /// Second player.
    P2,
}

impl Role {
    /// Both roles in assignment order.
    pub const ALL: [Role; 2] = [Role::P1, Role::P2];

    /// The opposing role.
    pub fn other(self) -> Role {
        match self {
            Role::P1 => Role::P2,
            Role::P2 => Role::P1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::P1 => write!(f, "P1"),
            Role::P2 => write!(f, "P2"),
        }
    }
}

/// A rock-paper-scissors move, encoded as 0/1/2 on the wire and in circuits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "i64")]
#[repr(u8)]
pub enum Move {
    /// 0
    Rock = 0,
    /// 1
    Paper = 1,
    /// 2
    Scissors = 2,
}

impl Move {
    /// Circuit encoding.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether `self` beats `other`.
    pub fn beats(self, other: Move) -> bool {
        matches!(
            (self, other),
            (Move::Rock, Move::Scissors) | (Move::Paper, Move::Rock) | (Move::Scissors, Move::Paper)
        )
    }
}

impl From<Move> for u8 {
    fn from(m: Move) -> u8 {
        m.as_u8()
    }
}

impl TryFrom<i64> for Move {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Move::Rock),
            1 => Ok(Move::Paper),
            2 => Ok(Move::Scissors),
            other => Err(format!("move must be 0, 1 or 2 (got {})", other)),
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Move::Rock => write!(f, "Rock"),
            Move::Paper => write!(f, "Paper"),
            Move::Scissors => write!(f, "Scissors"),
        }
    }
}

/// Game outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    /// Player 1 won.
    P1,
    /// Player 2 won.
    P2,
    /// Same move on both sides.
    Draw,
}

impl From<Role> for Winner {
    fn from(role: Role) -> Self {
        match role {
            Role::P1 => Winner::P1,
            Role::P2 => Winner::P2,
        }
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Winner::P1 => write!(f, "P1"),
            Winner::P2 => write!(f, "P2"),
            Winner::Draw => write!(f, "Draw"),
        }
    }
}

/// Decide the winner from both verified moves.
pub fn determine_winner(p1: Move, p2: Move) -> Winner {
    if p1 == p2 {
        Winner::Draw
    } else if p1.beats(p2) {
        Winner::P1
    } else {
        Winner::P2
    }
}
