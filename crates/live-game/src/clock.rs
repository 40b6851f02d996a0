//! Per-player countdown with Fischer increment.
//!
//! The engine is a pure state machine: the session driver calls [`ClockEngine::tick`]
//! at a deca-second cadence with the measured elapsed time, and forwards ply
//! changes and authoritative snapshots. Authoritative snapshots always win
//! over local prediction.

use std::time::Duration;

use chess_core::TimeControl;
use shakmaty::Color;

/// Low-time alert threshold, one-shot per color per game.
pub const LOW_TIME_THRESHOLD_SECS: f64 = 60.0;

/// Below this remaining time the display switches to tenths of a second.
pub const FRACTIONAL_DISPLAY_BELOW_SECS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSignal {
    /// A color's flag fell while it was to move. Fired at most once per game.
    Timeout(Color),
    /// First crossing below [`LOW_TIME_THRESHOLD_SECS`] while to move.
    LowTime(Color),
    /// The game ended before any flag fell; ticking has stopped.
    GameOver,
}

#[derive(Debug, Clone)]
pub struct ClockEngine {
    control: TimeControl,
    white_secs: f64,
    black_secs: f64,
    last_ply: u32,
    game_over: bool,
    game_over_signaled: bool,
    timed_out: Option<Color>,
    low_time_white: bool,
    low_time_black: bool,
}

impl ClockEngine {
    pub fn new(control: TimeControl) -> Self {
        let initial = control.initial_seconds as f64;
        Self {
            control,
            white_secs: initial,
            black_secs: initial,
            last_ply: 0,
            game_over: false,
            game_over_signaled: false,
            timed_out: None,
            low_time_white: false,
            low_time_black: false,
        }
    }

    pub fn is_untimed(&self) -> bool {
        self.control.is_untimed()
    }

    pub fn white_seconds(&self) -> f64 {
        self.white_secs.max(0.0)
    }

    pub fn black_seconds(&self) -> f64 {
        self.black_secs.max(0.0)
    }

    pub fn seconds(&self, color: Color) -> f64 {
        match color {
            Color::White => self.white_seconds(),
            Color::Black => self.black_seconds(),
        }
    }

    /// The color whose clock is running, by ply parity.
    pub fn to_move(&self) -> Color {
        if self.last_ply % 2 == 0 {
            Color::White
        } else {
            Color::Black
        }
    }

    fn remaining_mut(&mut self, color: Color) -> &mut f64 {
        match color {
            Color::White => &mut self.white_secs,
            Color::Black => &mut self.black_secs,
        }
    }

    fn low_time_latch(&mut self, color: Color) -> &mut bool {
        match color {
            Color::White => &mut self.low_time_white,
            Color::Black => &mut self.low_time_black,
        }
    }

    /// Advance the countdown for the active color. Returns any signals raised
    /// by this tick. Untimed games never tick; nothing runs before the first
    /// move (the abort window covers that phase).
    pub fn tick(&mut self, elapsed: Duration) -> Vec<ClockSignal> {
        let mut signals = Vec::new();
        if self.control.is_untimed() {
            return signals;
        }
        if self.game_over {
            if self.timed_out.is_none() && !self.game_over_signaled {
                self.game_over_signaled = true;
                signals.push(ClockSignal::GameOver);
            }
            return signals;
        }
        if self.last_ply == 0 {
            return signals;
        }

        let active = self.to_move();
        if self.timed_out == Some(active) {
            return signals;
        }

        let rem = self.remaining_mut(active);
        *rem = (*rem - elapsed.as_secs_f64()).max(0.0);
        let now = *rem;

        if now > 0.0 && now < LOW_TIME_THRESHOLD_SECS && !*self.low_time_latch(active) {
            *self.low_time_latch(active) = true;
            signals.push(ClockSignal::LowTime(active));
        }

        if now <= 0.0 && self.timed_out.is_none() {
            self.timed_out = Some(active);
            signals.push(ClockSignal::Timeout(active));
        }

        signals
    }

    /// Observe a new ply count from a locally applied move. Credits the
    /// increment to the mover of each completed ply, exactly once. A ply
    /// count of zero is a game reset and clears the one-shot latches.
    pub fn apply_ply(&mut self, ply: u32) {
        if ply == 0 {
            *self = Self::new(self.control);
            return;
        }
        if self.control.is_untimed() || ply <= self.last_ply {
            return;
        }
        for p in (self.last_ply + 1)..=ply {
            // Odd plies are white's moves.
            let mover = if p % 2 == 1 {
                Color::White
            } else {
                Color::Black
            };
            *self.remaining_mut(mover) += self.control.increment_seconds as f64;
        }
        self.last_ply = ply;
    }

    /// Overwrite local counters with an authoritative snapshot. The snapshot
    /// already includes any increments, so none are re-applied here.
    pub fn resync(&mut self, ply: u32, white_secs: f64, black_secs: f64) {
        if self.control.is_untimed() {
            return;
        }
        self.last_ply = ply;
        self.white_secs = white_secs;
        self.black_secs = black_secs;
    }

    /// Stop ticking. The next tick emits a single `GameOver` signal unless a
    /// timeout was already raised.
    pub fn set_game_over(&mut self) {
        self.game_over = true;
    }

    pub fn timed_out(&self) -> Option<Color> {
        self.timed_out
    }

    /// Display string: "m:ss" normally, tenths under ten seconds.
    pub fn display(&self, color: Color) -> String {
        let secs = self.seconds(color);
        if secs < FRACTIONAL_DISPLAY_BELOW_SECS {
            format!("{:.1}", secs)
        } else {
            let whole = secs as u64;
            format!("{}:{:02}", whole / 60, whole % 60)
        }
    }
}
