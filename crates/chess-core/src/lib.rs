//! Core chess domain types shared by the live-game engine and the advisor:
//! the rules-engine boundary, persisted wire formats, and move-log replay.

pub mod outcome;
pub mod pgn;
pub mod position;
pub mod replay;
pub mod wire;

pub use outcome::{Outcome, Termination};
pub use pgn::{extract_san_moves, extract_time_control};
pub use position::{normalize_fen, LiveBoard, STARTING_FEN};
pub use replay::{clock_remaining, replay, ReplaySnapshot};
pub use wire::{DrawOffer, MoveRecord, TimeControl, WireError};
