//! Terminal game results and the reasons that produced them.

use serde::{Deserialize, Serialize};
use shakmaty::Color;

/// Final result of a game. Set at most once per game and never retracted.
/// `Aborted` is reserved for games with zero completed moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    WhiteWins,
    BlackWins,
    Draw,
    Aborted,
}

impl Outcome {
    /// The winning side, if the game was decisive.
    pub fn winner(&self) -> Option<Color> {
        match self {
            Outcome::WhiteWins => Some(Color::White),
            Outcome::BlackWins => Some(Color::Black),
            Outcome::Draw | Outcome::Aborted => None,
        }
    }

    pub fn win_for(color: Color) -> Self {
        match color {
            Color::White => Outcome::WhiteWins,
            Color::Black => Outcome::BlackWins,
        }
    }

    /// PGN result tag: "1-0", "0-1", "1/2-1/2", or "*" for an aborted game.
    pub fn pgn_tag(&self) -> &'static str {
        match self {
            Outcome::WhiteWins => "1-0",
            Outcome::BlackWins => "0-1",
            Outcome::Draw => "1/2-1/2",
            Outcome::Aborted => "*",
        }
    }
}

/// How the game ended. The display strings below are what the authoritative
/// store records in its termination column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Checkmate,
    Resignation,
    Timeout,
    Agreement,
    Repetition,
    FiftyMove,
    InsufficientMaterial,
    Stalemate,
    Abandoned,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Checkmate => "Checkmate",
            Termination::Resignation => "Resignation",
            Termination::Timeout => "Timeout",
            Termination::Agreement => "Draw by Agreement",
            Termination::Repetition => "Draw by Repetition",
            Termination::FiftyMove => "Draw by Fifty-Move Rule",
            Termination::InsufficientMaterial => "Draw by Insufficient Material",
            Termination::Stalemate => "Stalemate",
            Termination::Abandoned => "Aborted",
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
