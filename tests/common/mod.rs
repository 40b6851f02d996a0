use std::sync::{Arc, Once};
use std::time::Duration;

use chrono::{DateTime, Utc};
use shakmaty::Color;

use chess_core::{LiveBoard, MoveRecord, TimeControl};
use live_game::{MemoryStore, SessionRow};

static INIT: Once = Once::new();

/// Install the test subscriber once; honors RUST_LOG.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Builds a wire-encoded move log the way two live clients would: each move
/// burns think time from the mover's clock, credits the increment, and embeds
/// the resulting snapshot in the record.
pub struct LogBuilder {
    board: LiveBoard,
    control: TimeControl,
    white: f64,
    black: f64,
    now: DateTime<Utc>,
    log: Vec<MoveRecord>,
}

impl LogBuilder {
    pub fn new(control: TimeControl, start: DateTime<Utc>) -> Self {
        Self {
            board: LiveBoard::new(),
            control,
            white: control.initial_seconds as f64,
            black: control.initial_seconds as f64,
            now: start,
            log: Vec::new(),
        }
    }

    pub fn play(&mut self, san: &str, think_secs: f64) -> &mut Self {
        let mover = self.board.turn();
        let applied = self
            .board
            .try_san(san)
            .unwrap_or_else(|| panic!("illegal move in fixture: {san}"));
        self.now += chrono::Duration::milliseconds((think_secs * 1000.0) as i64);
        let increment = self.control.increment_seconds as f64;
        match mover {
            Color::White => self.white += increment - think_secs,
            Color::Black => self.black += increment - think_secs,
        }
        self.log.push(
            MoveRecord::new(applied.from, applied.to, self.now).with_clocks(self.white, self.black),
        );
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn records(&self) -> &[MoveRecord] {
        &self.log
    }

    pub fn encoded(&self) -> Vec<String> {
        self.log.iter().map(MoveRecord::encode).collect()
    }
}

/// Poll the store until the row satisfies the predicate. Under a paused
/// runtime the sleeps auto-advance, so this stays fast.
pub async fn wait_for_row(
    store: &Arc<MemoryStore>,
    game_id: &str,
    pred: impl Fn(&SessionRow) -> bool,
) -> SessionRow {
    for _ in 0..1000 {
        if let Some(row) = store.row(game_id) {
            if pred(&row) {
                return row;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("store row for {game_id} never reached the expected state");
}
