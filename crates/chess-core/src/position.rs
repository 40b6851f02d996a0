//! Rules-engine boundary: a shakmaty position plus the bookkeeping the rules
//! library does not track for us (ply count, repetition table).

use std::collections::HashMap;

use shakmaty::{
    fen::Fen, san::San, uci::UciMove, CastlingMode, Chess, Color, EnPassantMode, Position, Role,
    Square,
};

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Strips move counters from a FEN, keeping only position + side + castling + ep.
/// Used as the repetition key and for opening-book lookups.
pub fn normalize_fen(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

/// A move that was accepted by the rules engine.
#[derive(Debug, Clone)]
pub struct AppliedMove {
    pub san: String,
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
}

/// Live position wrapper. All legality questions and terminal predicates go
/// through here; callers never touch shakmaty directly.
#[derive(Debug, Clone)]
pub struct LiveBoard {
    pos: Chess,
    ply: u32,
    seen: HashMap<String, u32>,
}

impl Default for LiveBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveBoard {
    pub fn new() -> Self {
        let pos = Chess::default();
        let mut seen = HashMap::new();
        seen.insert(normalize_fen(STARTING_FEN), 1);
        Self { pos, ply: 0, seen }
    }

    pub fn turn(&self) -> Color {
        self.pos.turn()
    }

    /// Number of half-moves played from the initial position.
    pub fn ply(&self) -> u32 {
        self.ply
    }

    pub fn fen(&self) -> String {
        Fen::from_position(&self.pos, EnPassantMode::Legal).to_string()
    }

    pub fn normalized_fen(&self) -> String {
        normalize_fen(&self.fen())
    }

    pub fn role_at(&self, sq: Square) -> Option<Role> {
        self.pos.board().piece_at(sq).map(|p| p.role)
    }

    /// Attempt a (from, to, promotion) move. Returns `None` if illegal; on
    /// success the move is applied and its SAN label returned.
    pub fn try_move(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<Role>,
    ) -> Option<AppliedMove> {
        let uci = UciMove::Normal {
            from,
            to,
            promotion,
        };
        let mv = uci.to_move(&self.pos).ok()?;
        let san = San::from_move(&self.pos, mv).to_string();
        self.pos.play_unchecked(mv);
        self.ply += 1;
        let key = self.normalized_fen();
        *self.seen.entry(key).or_insert(0) += 1;
        // Castling round-trips through UCI so the wire squares stay stable.
        let (from, to, promotion) = match mv.to_uci(CastlingMode::Standard) {
            UciMove::Normal {
                from,
                to,
                promotion,
            } => (from, to, promotion),
            _ => (from, to, promotion),
        };
        Some(AppliedMove {
            san,
            from,
            to,
            promotion,
        })
    }

    /// Attempt a SAN move (analysis-board import path).
    pub fn try_san(&mut self, san: &str) -> Option<AppliedMove> {
        let parsed: San = san.parse().ok()?;
        let mv = parsed.to_move(&self.pos).ok()?;
        let (from, to, promotion) = match mv.to_uci(CastlingMode::Standard) {
            UciMove::Normal {
                from,
                to,
                promotion,
            } => (from, to, promotion),
            _ => return None,
        };
        self.try_move(from, to, promotion)
    }

    pub fn is_checkmate(&self) -> bool {
        self.pos.is_checkmate()
    }

    pub fn is_stalemate(&self) -> bool {
        self.pos.is_stalemate()
    }

    pub fn is_check(&self) -> bool {
        self.pos.is_check()
    }

    pub fn has_insufficient_material(&self) -> bool {
        self.pos.is_insufficient_material()
    }

    /// Fifty-move rule: 100 half-moves without a capture or pawn move.
    pub fn is_fifty_move_draw(&self) -> bool {
        self.pos.halfmoves() >= 100
    }

    /// Threefold repetition of the current position.
    pub fn is_repetition_draw(&self) -> bool {
        self.seen.get(&self.normalized_fen()).copied().unwrap_or(0) >= 3
    }
}
