//! Game lifecycle reconciliation.
//!
//! `GameStateReconciler` is the single authority for "has the game state
//! changed, and how". It consumes explicit events (authoritative row updates,
//! local input, clock signals, the abort window) and emits effects; it never
//! touches the network, timers, or the clock directly, so the whole lifecycle
//! is testable with synthetic event sequences.
//!
//! Reconciliation rule: whenever the authoritative log is longer than the
//! local one, the local game is rebuilt by replaying the entire log from the
//! initial position. Diffs are never trusted. An optimistic local move stays
//! pending until the store echoes it; if the echo never comes, the move is
//! rolled back by the same full replay.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shakmaty::{Color, Role, Square};

use chess_core::{
    clock_remaining, replay, DrawOffer, LiveBoard, MoveRecord, Outcome, Termination, TimeControl,
    WireError,
};

use crate::error::GameError;
use crate::rating::{RatingEstimator, RatingSnapshot, RatingUpdate};

/// Abort window for the side that moves first. Slightly shorter than the
/// responder's window so exactly one client performs the abort write.
pub const FIRST_MOVER_ABORT_WINDOW: Duration = Duration::from_secs(15);

/// Abort window for the responding side, which only observes the abort.
pub const RESPONDER_ABORT_WINDOW: Duration = Duration::from_secs(16);

/// Read-mostly projection of the authoritative game row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub white_id: String,
    pub black_id: String,
    pub time_control: TimeControl,
    pub rated: bool,
    /// Wire-encoded move records, append-only. Index defines ply number.
    pub moves: Vec<String>,
    pub result: Option<Outcome>,
    pub termination: Option<String>,
    /// Raw draw-offer field (see [`DrawOffer`]).
    pub draw_offer: String,
    pub white_rating: f64,
    pub white_games: u32,
    pub black_rating: f64,
    pub black_games: u32,
}

impl SessionRow {
    pub fn new(
        id: impl Into<String>,
        white_id: impl Into<String>,
        black_id: impl Into<String>,
        time_control: TimeControl,
        rated: bool,
    ) -> Self {
        Self {
            id: id.into(),
            white_id: white_id.into(),
            black_id: black_id.into(),
            time_control,
            rated,
            moves: Vec::new(),
            result: None,
            termination: None,
            draw_offer: String::new(),
            white_rating: 1500.0,
            white_games: 0,
            black_rating: 1500.0,
            black_games: 0,
        }
    }

    /// Decode the move log. Records with bad squares are a hard error; bad
    /// time fields already degraded inside [`MoveRecord::decode`].
    pub fn records(&self) -> Result<Vec<MoveRecord>, WireError> {
        self.moves.iter().map(|m| MoveRecord::decode(m)).collect()
    }
}

/// Lifecycle phase. `Aborted` is terminal and reachable only from
/// `WaitingForFirstMove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WaitingForFirstMove,
    InProgress,
    Finished,
    Aborted,
}

/// Inbound events, delivered through a single queue by the session driver.
#[derive(Debug, Clone)]
pub enum Event {
    /// Fresh authoritative row (realtime push or explicit fetch).
    Update(SessionRow),
    /// The local player proposed a move. Clock readings come along so the
    /// submitted record can embed a time-remaining snapshot.
    LocalMove {
        from: Square,
        to: Square,
        promotion: Option<Role>,
        white_seconds: Option<f64>,
        black_seconds: Option<f64>,
    },
    ClockTimeout(Color),
    AbortWindowExpired,
    Resign,
    OfferDraw,
    AcceptDraw,
    DeclineDraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundCue {
    Move,
    Victory,
    Loss,
    Draw,
    Abort,
    LowTime,
}

/// Side effects requested by the reconciler; the session driver executes them.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartAbortWindow(Duration),
    CancelAbortWindow,
    /// Append this record to the authoritative log.
    SubmitMove(MoveRecord),
    /// Ply advanced locally; the clock credits the increment.
    PlyAdvanced(u32),
    /// Authoritative clock snapshot; overwrites local counters.
    ResyncClock {
        ply: u32,
        white_seconds: f64,
        black_seconds: f64,
    },
    /// Ply advanced remotely but no usable snapshot came with it.
    SyncPly(u32),
    /// Record the terminal result. Emitted only by the client gated to
    /// perform the finalization write.
    RecordResult {
        outcome: Outcome,
        termination: Termination,
        ratings: Option<RatingUpdate>,
    },
    WriteDrawOffer(String),
    SetGameOver,
    Sound(SoundCue),
}

#[derive(Debug)]
pub struct GameStateReconciler {
    perspective: Color,
    my_id: String,
    rated: bool,
    control: TimeControl,
    white_snapshot: RatingSnapshot,
    black_snapshot: RatingSnapshot,
    phase: Phase,
    board: LiveBoard,
    log: Vec<MoveRecord>,
    san: Vec<String>,
    result: Option<Outcome>,
    termination: Option<String>,
    draw_offer: DrawOffer,
    /// The last log entry is an optimistic local move the store has not
    /// acknowledged yet.
    awaiting_append: bool,
    abort_window_first_mover: Duration,
    abort_window_responder: Duration,
}

impl GameStateReconciler {
    pub fn new(row: &SessionRow, perspective: Color) -> Result<Self, GameError> {
        let my_id = match perspective {
            Color::White => row.white_id.clone(),
            Color::Black => row.black_id.clone(),
        };
        let log = row.records()?;
        let snapshot = replay(&log)?;

        let phase = match (row.result, log.is_empty()) {
            (Some(Outcome::Aborted), _) => Phase::Aborted,
            (Some(_), _) => Phase::Finished,
            (None, true) => Phase::WaitingForFirstMove,
            (None, false) => Phase::InProgress,
        };

        Ok(Self {
            perspective,
            my_id,
            rated: row.rated,
            control: row.time_control,
            white_snapshot: RatingSnapshot::new(row.white_rating, row.white_games),
            black_snapshot: RatingSnapshot::new(row.black_rating, row.black_games),
            phase,
            board: snapshot.board,
            san: snapshot.san,
            log,
            result: row.result,
            termination: row.termination.clone(),
            draw_offer: DrawOffer::decode(&row.draw_offer),
            awaiting_append: false,
            abort_window_first_mover: FIRST_MOVER_ABORT_WINDOW,
            abort_window_responder: RESPONDER_ABORT_WINDOW,
        })
    }

    /// Override the abort window lengths (they are tie-breakers, not
    /// load-bearing values).
    pub fn with_abort_windows(mut self, first_mover: Duration, responder: Duration) -> Self {
        self.abort_window_first_mover = first_mover;
        self.abort_window_responder = responder;
        self
    }

    /// Initial effects for a freshly attached client: arm the abort window
    /// if no move has been played, or resync the clock from the log.
    pub fn start(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        let mut fx = Vec::new();
        match self.phase {
            Phase::WaitingForFirstMove => {
                fx.push(Effect::StartAbortWindow(self.my_abort_window()));
            }
            Phase::InProgress => {
                if let Some((w, b)) = clock_remaining(&self.log, now) {
                    fx.push(Effect::ResyncClock {
                        ply: self.ply(),
                        white_seconds: w,
                        black_seconds: b,
                    });
                } else {
                    fx.push(Effect::SyncPly(self.ply()));
                }
            }
            Phase::Finished | Phase::Aborted => fx.push(Effect::SetGameOver),
        }
        fx
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn result(&self) -> Option<Outcome> {
        self.result
    }

    pub fn termination(&self) -> Option<&str> {
        self.termination.as_deref()
    }

    pub fn draw_offer(&self) -> &DrawOffer {
        &self.draw_offer
    }

    pub fn perspective(&self) -> Color {
        self.perspective
    }

    pub fn ply(&self) -> u32 {
        self.board.ply()
    }

    pub fn turn(&self) -> Color {
        self.board.turn()
    }

    pub fn fen(&self) -> String {
        self.board.fen()
    }

    pub fn san_moves(&self) -> &[String] {
        &self.san
    }

    pub fn move_log(&self) -> &[MoveRecord] {
        &self.log
    }

    fn my_abort_window(&self) -> Duration {
        // White moves first and is the designated abort writer.
        if self.perspective == Color::White {
            self.abort_window_first_mover
        } else {
            self.abort_window_responder
        }
    }

    /// Process one event against the current state.
    pub fn handle(&mut self, event: Event, now: DateTime<Utc>) -> Vec<Effect> {
        match event {
            Event::Update(row) => self.on_update(row, now),
            Event::LocalMove {
                from,
                to,
                promotion,
                white_seconds,
                black_seconds,
            } => self.on_local_move(from, to, promotion, white_seconds, black_seconds, now),
            Event::ClockTimeout(color) => self.on_timeout(color),
            Event::AbortWindowExpired => self.on_abort_expired(),
            Event::Resign => self.on_resign(),
            Event::OfferDraw => self.on_offer_draw(),
            Event::AcceptDraw => self.on_accept_draw(),
            Event::DeclineDraw => self.on_decline_draw(),
        }
    }

    fn on_update(&mut self, row: SessionRow, now: DateTime<Utc>) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.result.is_some() {
            return fx;
        }

        // Reconcile the log before adopting any result, so a coalesced
        // update carrying the final moves together with the result still
        // leaves the board current.
        match row.records() {
            Ok(remote) => self.reconcile_log(remote, now, &mut fx),
            Err(e) => {
                tracing::warn!(game = %row.id, error = %e, "unreadable authoritative log");
            }
        }

        // A recorded result always wins over local computation.
        if let Some(outcome) = row.result {
            if matches!(self.phase, Phase::WaitingForFirstMove) {
                fx.push(Effect::CancelAbortWindow);
            }
            self.result = Some(outcome);
            self.termination = row.termination.clone();
            self.phase = if outcome == Outcome::Aborted {
                Phase::Aborted
            } else {
                Phase::Finished
            };
            fx.push(Effect::SetGameOver);
            fx.push(Effect::Sound(self.sound_for(outcome)));
            return fx;
        }

        self.draw_offer = DrawOffer::decode(&row.draw_offer);
        if let DrawOffer::Accepted(..) = self.draw_offer {
            // Both ids present: the accepting client already performed the
            // result write; everyone else just observes.
            let i_accepted = false;
            self.finalize(Outcome::Draw, Termination::Agreement, i_accepted, &mut fx);
            return fx;
        }

        if let Some((outcome, termination)) = self.rules_result() {
            // Only the client whose turn it is post-outcome writes.
            let i_write = self.board.turn() == self.perspective;
            self.finalize(outcome, termination, i_write, &mut fx);
        }
        fx
    }

    /// Rebuild local state from the authoritative log. A longer remote log
    /// is replayed wholesale. A shorter or equal one matters only while an
    /// optimistic local move is awaiting its append: equal length confirms
    /// the append, shorter means it never landed and the local move is
    /// reverted by replaying the authoritative log instead.
    fn reconcile_log(&mut self, remote: Vec<MoveRecord>, now: DateTime<Utc>, fx: &mut Vec<Effect>) {
        use std::cmp::Ordering;
        match remote.len().cmp(&self.log.len()) {
            Ordering::Equal => {
                self.awaiting_append = false;
                return;
            }
            Ordering::Less => {
                if !self.awaiting_append {
                    return;
                }
                tracing::warn!(
                    local = self.log.len(),
                    remote = remote.len(),
                    "optimistic move missing from authoritative log; reverting"
                );
            }
            Ordering::Greater => {}
        }

        let snapshot = match replay(&remote) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "authoritative log fails replay");
                return;
            }
        };
        let reverted = remote.len() < self.log.len();
        self.board = snapshot.board;
        self.san = snapshot.san;
        self.log = remote;
        self.awaiting_append = false;

        if reverted && self.log.is_empty() {
            // The first move never landed; re-arm the abort window and put
            // the clock back at its initial readings.
            self.phase = Phase::WaitingForFirstMove;
            fx.push(Effect::StartAbortWindow(self.my_abort_window()));
            let initial = self.control.initial_seconds as f64;
            fx.push(Effect::ResyncClock {
                ply: 0,
                white_seconds: initial,
                black_seconds: initial,
            });
            return;
        }

        if matches!(self.phase, Phase::WaitingForFirstMove) {
            fx.push(Effect::CancelAbortWindow);
            self.phase = Phase::InProgress;
        }
        if !reverted {
            fx.push(Effect::Sound(SoundCue::Move));
        }
        match clock_remaining(&self.log, now) {
            Some((w, b)) => fx.push(Effect::ResyncClock {
                ply: self.ply(),
                white_seconds: w,
                black_seconds: b,
            }),
            None => fx.push(Effect::SyncPly(self.ply())),
        }
    }

    fn on_local_move(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<Role>,
        white_seconds: Option<f64>,
        black_seconds: Option<f64>,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.result.is_some()
            || matches!(self.phase, Phase::Finished | Phase::Aborted)
            || self.board.turn() != self.perspective
            || self.board.is_repetition_draw()
        {
            return fx;
        }

        let Some(applied) = self.board.try_move(from, to, promotion) else {
            return fx;
        };
        self.san.push(applied.san.clone());

        // The embedded snapshot must already include the mover's increment,
        // since resync never re-credits it.
        let increment = self.control.increment_seconds as f64;
        let mut record = MoveRecord::new(applied.from, applied.to, now);
        if let (Some(mut w), Some(mut b)) = (white_seconds, black_seconds) {
            match self.perspective {
                Color::White => w += increment,
                Color::Black => b += increment,
            }
            record = record.with_clocks(w, b);
        }
        self.log.push(record.clone());
        self.awaiting_append = true;

        if matches!(self.phase, Phase::WaitingForFirstMove) {
            fx.push(Effect::CancelAbortWindow);
            self.phase = Phase::InProgress;
        }
        fx.push(Effect::SubmitMove(record));
        fx.push(Effect::PlyAdvanced(self.ply()));
        fx.push(Effect::Sound(SoundCue::Move));

        if let Some((outcome, termination)) = self.rules_result() {
            // Post-outcome it is the opponent's turn, so they perform the
            // finalization write; this client only settles its local state.
            let i_write = self.board.turn() == self.perspective;
            self.finalize(outcome, termination, i_write, &mut fx);
        }
        fx
    }

    fn on_timeout(&mut self, color: Color) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.result.is_some() || !matches!(self.phase, Phase::InProgress) {
            return fx;
        }
        // The client whose flag fell performs the write; the opponent's
        // reconciliation adopts it.
        let i_write = color == self.perspective;
        self.finalize(Outcome::win_for(color.other()), Termination::Timeout, i_write, &mut fx);
        fx
    }

    fn on_abort_expired(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.result.is_some()
            || !matches!(self.phase, Phase::WaitingForFirstMove)
            || !self.log.is_empty()
        {
            return fx;
        }
        // Asymmetric windows make the first mover's client fire first; it is
        // the sole abort writer.
        let i_write = self.perspective == Color::White;
        self.finalize(Outcome::Aborted, Termination::Abandoned, i_write, &mut fx);
        fx
    }

    fn on_resign(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.result.is_some() || !matches!(self.phase, Phase::InProgress) {
            return fx;
        }
        let winner = self.perspective.other();
        self.finalize(Outcome::win_for(winner), Termination::Resignation, true, &mut fx);
        fx
    }

    fn on_offer_draw(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.result.is_none()
            && matches!(self.phase, Phase::InProgress)
            && self.draw_offer == DrawOffer::None
        {
            self.draw_offer = DrawOffer::Outstanding(self.my_id.clone());
            fx.push(Effect::WriteDrawOffer(self.draw_offer.encode()));
        }
        fx
    }

    fn on_accept_draw(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        // A player cannot answer their own offer.
        if self.result.is_some() || self.draw_offer.offered_by(&self.my_id) {
            return fx;
        }
        if let DrawOffer::Outstanding(offerer) = self.draw_offer.clone() {
            self.draw_offer = DrawOffer::Accepted(offerer, self.my_id.clone());
            fx.push(Effect::WriteDrawOffer(self.draw_offer.encode()));
            self.finalize(Outcome::Draw, Termination::Agreement, true, &mut fx);
        }
        fx
    }

    fn on_decline_draw(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.draw_offer.offered_by(&self.my_id) {
            return fx;
        }
        if matches!(self.draw_offer, DrawOffer::Outstanding(_)) {
            self.draw_offer = DrawOffer::None;
            fx.push(Effect::WriteDrawOffer(String::new()));
        }
        fx
    }

    /// Terminal state implied by the rules engine, if any.
    fn rules_result(&self) -> Option<(Outcome, Termination)> {
        if self.board.is_checkmate() {
            let winner = self.board.turn().other();
            return Some((Outcome::win_for(winner), Termination::Checkmate));
        }
        if self.board.is_stalemate() {
            return Some((Outcome::Draw, Termination::Stalemate));
        }
        if self.board.is_repetition_draw() {
            return Some((Outcome::Draw, Termination::Repetition));
        }
        if self.board.is_fifty_move_draw() {
            return Some((Outcome::Draw, Termination::FiftyMove));
        }
        if self.board.has_insufficient_material() {
            return Some((Outcome::Draw, Termination::InsufficientMaterial));
        }
        None
    }

    fn sound_for(&self, outcome: Outcome) -> SoundCue {
        match outcome.winner() {
            Some(w) if w == self.perspective => SoundCue::Victory,
            Some(_) => SoundCue::Loss,
            None if outcome == Outcome::Aborted => SoundCue::Abort,
            None => SoundCue::Draw,
        }
    }

    /// Settle the local result exactly once. Only the gated client appends
    /// the `RecordResult` effect; the store's checked precondition makes a
    /// losing race a benign no-op anyway.
    fn finalize(
        &mut self,
        outcome: Outcome,
        termination: Termination,
        i_write: bool,
        fx: &mut Vec<Effect>,
    ) {
        if self.result.is_some() {
            return;
        }
        if matches!(self.phase, Phase::WaitingForFirstMove) {
            fx.push(Effect::CancelAbortWindow);
        }
        self.result = Some(outcome);
        self.termination = Some(termination.as_str().to_string());
        self.phase = if outcome == Outcome::Aborted {
            Phase::Aborted
        } else {
            Phase::Finished
        };
        fx.push(Effect::SetGameOver);
        fx.push(Effect::Sound(self.sound_for(outcome)));
        if i_write {
            let ratings = if self.rated && outcome != Outcome::Aborted {
                RatingEstimator::update(self.white_snapshot, self.black_snapshot, outcome)
            } else {
                None
            };
            fx.push(Effect::RecordResult {
                outcome,
                termination,
                ratings,
            });
        }
    }
}
