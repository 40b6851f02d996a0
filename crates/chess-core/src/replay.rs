//! Full-log replay. The authoritative move log is the only total order; local
//! state is always rebuilt by replaying the whole log from the initial
//! position, never by merging a diff.

use chrono::{DateTime, Utc};
use shakmaty::{Rank, Role};

use crate::position::LiveBoard;
use crate::wire::{MoveRecord, WireError};

/// Everything derivable from a move log.
#[derive(Debug, Clone)]
pub struct ReplaySnapshot {
    pub board: LiveBoard,
    pub san: Vec<String>,
}

impl ReplaySnapshot {
    pub fn ply(&self) -> u32 {
        self.board.ply()
    }
}

/// Replay a log from the initial position.
///
/// The wire format carries no promotion piece, so a pawn reaching the last
/// rank is replayed as a queen promotion (the only promotion the producing
/// client ever submits).
pub fn replay(log: &[MoveRecord]) -> Result<ReplaySnapshot, WireError> {
    let mut board = LiveBoard::new();
    let mut san = Vec::with_capacity(log.len());

    for (ply, rec) in log.iter().enumerate() {
        let promotion = if board.role_at(rec.from) == Some(Role::Pawn)
            && matches!(rec.to.rank(), Rank::First | Rank::Eighth)
        {
            Some(Role::Queen)
        } else {
            None
        };
        let applied = board
            .try_move(rec.from, rec.to, promotion)
            .ok_or(WireError::IllegalMove {
                ply,
                from: rec.from,
                to: rec.to,
            })?;
        san.push(applied.san);
    }

    Ok(ReplaySnapshot { board, san })
}

/// Remaining (white, black) seconds implied by the log at wall-clock `now`:
/// the last record's embedded snapshot, with the time elapsed since that
/// record charged only to the side currently to move.
///
/// Returns `None` when the log is empty or the last record carries no usable
/// snapshot — the caller then makes no adjustment.
pub fn clock_remaining(log: &[MoveRecord], now: DateTime<Utc>) -> Option<(f64, f64)> {
    let last = log.last()?;
    let (mut white, mut black) = (last.white_seconds?, last.black_seconds?);

    if let Some(ts) = last.timestamp {
        let elapsed = (now - ts).num_milliseconds().max(0) as f64 / 1000.0;
        // After an even number of plies white is to move.
        if log.len() % 2 == 0 {
            white = (white - elapsed).max(0.0);
        } else {
            black = (black - elapsed).max(0.0);
        }
    }

    Some((white, black))
}
