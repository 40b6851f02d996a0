//! Session driver: wires the pure reconciler and clock to timers and the
//! authoritative store.
//!
//! One tokio task per attached game. The task owns the deca-second tick, the
//! cancellable abort-window sleep, and the store subscription, and it funnels
//! everything into the reconciler as explicit events. Dropping the task (or
//! calling [`SessionHandle::shutdown`]) tears down every timer, so nothing
//! stale can fire against a closed session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use shakmaty::{Color, Role, Square};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

use chess_core::{MoveRecord, Outcome};

use crate::clock::{ClockEngine, ClockSignal};
use crate::rating::RatingUpdate;
use crate::reconcile::{
    Effect, Event, GameStateReconciler, SessionRow, SoundCue, FIRST_MOVER_ABORT_WINDOW,
    RESPONDER_ABORT_WINDOW,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("game not found: {0}")]
    GameNotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Authoritative store boundary. The store serializes all writers: the move
/// log is append-only and the result field is write-once.
#[allow(async_fn_in_trait)]
pub trait GameStore: Send + Sync + 'static {
    async fn fetch(&self, game_id: &str) -> Result<SessionRow, StoreError>;

    async fn append_move(&self, game_id: &str, record: &MoveRecord) -> Result<(), StoreError>;

    /// Record the terminal result and apply rating changes in one
    /// transaction. Returns `false` when a result was already present; a
    /// losing race is not an error.
    async fn record_result(
        &self,
        game_id: &str,
        outcome: Outcome,
        termination: &str,
        ratings: Option<RatingUpdate>,
    ) -> Result<bool, StoreError>;

    async fn write_draw_offer(&self, game_id: &str, field: &str) -> Result<(), StoreError>;

    /// Push channel of changed game ids.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// In-process store used by tests and local play. A single mutex stands in
/// for the hosted store's serialization point.
#[derive(Clone)]
pub struct MemoryStore {
    rows: Arc<Mutex<HashMap<String, SessionRow>>>,
    result_writes: Arc<Mutex<HashMap<String, u32>>>,
    notify: broadcast::Sender<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(64);
        Self {
            rows: Arc::new(Mutex::new(HashMap::new())),
            result_writes: Arc::new(Mutex::new(HashMap::new())),
            notify,
        }
    }

    pub fn insert(&self, row: SessionRow) {
        let id = row.id.clone();
        self.rows.lock().unwrap().insert(id.clone(), row);
        self.touch(&id);
    }

    pub fn row(&self, game_id: &str) -> Option<SessionRow> {
        self.rows.lock().unwrap().get(game_id).cloned()
    }

    /// How many result writes actually committed for a game. The abort-race
    /// property wants this to be exactly one.
    pub fn result_write_count(&self, game_id: &str) -> u32 {
        self.result_writes
            .lock()
            .unwrap()
            .get(game_id)
            .copied()
            .unwrap_or(0)
    }

    fn touch(&self, game_id: &str) {
        let _ = self.notify.send(game_id.to_string());
    }
}

impl GameStore for MemoryStore {
    async fn fetch(&self, game_id: &str) -> Result<SessionRow, StoreError> {
        self.row(game_id)
            .ok_or_else(|| StoreError::GameNotFound(game_id.to_string()))
    }

    async fn append_move(&self, game_id: &str, record: &MoveRecord) -> Result<(), StoreError> {
        {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .get_mut(game_id)
                .ok_or_else(|| StoreError::GameNotFound(game_id.to_string()))?;
            row.moves.push(record.encode());
        }
        self.touch(game_id);
        Ok(())
    }

    async fn record_result(
        &self,
        game_id: &str,
        outcome: Outcome,
        termination: &str,
        ratings: Option<RatingUpdate>,
    ) -> Result<bool, StoreError> {
        {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .get_mut(game_id)
                .ok_or_else(|| StoreError::GameNotFound(game_id.to_string()))?;
            // Checked precondition: first writer wins.
            if row.result.is_some() {
                return Ok(false);
            }
            row.result = Some(outcome);
            row.termination = Some(termination.to_string());
            if let Some(update) = ratings {
                row.white_rating = update.white_new;
                row.black_rating = update.black_new;
                row.white_games += 1;
                row.black_games += 1;
            }
            *self
                .result_writes
                .lock()
                .unwrap()
                .entry(game_id.to_string())
                .or_insert(0) += 1;
        }
        self.touch(game_id);
        Ok(true)
    }

    async fn write_draw_offer(&self, game_id: &str, field: &str) -> Result<(), StoreError> {
        {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .get_mut(game_id)
                .ok_or_else(|| StoreError::GameNotFound(game_id.to_string()))?;
            row.draw_offer = field.to_string();
        }
        self.touch(game_id);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.notify.subscribe()
    }
}

/// What the local player can do; delivered to the driver over a channel.
#[derive(Debug, Clone)]
pub enum PlayerAction {
    Move {
        from: Square,
        to: Square,
        promotion: Option<Role>,
    },
    Resign,
    OfferDraw,
    AcceptDraw,
    DeclineDraw,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub game_id: String,
    pub perspective: Color,
    pub tick_interval: Duration,
    pub abort_window_first_mover: Duration,
    pub abort_window_responder: Duration,
}

impl SessionConfig {
    pub fn new(game_id: impl Into<String>, perspective: Color) -> Self {
        Self {
            game_id: game_id.into(),
            perspective,
            tick_interval: Duration::from_millis(100),
            abort_window_first_mover: FIRST_MOVER_ABORT_WINDOW,
            abort_window_responder: RESPONDER_ABORT_WINDOW,
        }
    }
}

/// Caller-side handle to a running session task.
pub struct SessionHandle {
    actions: mpsc::Sender<PlayerAction>,
    cues: mpsc::Receiver<SoundCue>,
    shutdown: watch::Sender<bool>,
}

impl SessionHandle {
    pub async fn act(&self, action: PlayerAction) -> bool {
        self.actions.send(action).await.is_ok()
    }

    pub async fn next_cue(&mut self) -> Option<SoundCue> {
        self.cues.recv().await
    }

    /// Tear the session down; all of its timers die with the task.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub struct SessionDriver<S> {
    store: Arc<S>,
    config: SessionConfig,
    actions: mpsc::Receiver<PlayerAction>,
    cues: mpsc::Sender<SoundCue>,
    shutdown: watch::Receiver<bool>,
}

/// Build a driver/handle pair. The caller spawns [`SessionDriver::run`].
pub fn session<S: GameStore>(store: Arc<S>, config: SessionConfig) -> (SessionDriver<S>, SessionHandle) {
    let (actions_tx, actions_rx) = mpsc::channel(32);
    let (cues_tx, cues_rx) = mpsc::channel(32);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    (
        SessionDriver {
            store,
            config,
            actions: actions_rx,
            cues: cues_tx,
            shutdown: shutdown_rx,
        },
        SessionHandle {
            actions: actions_tx,
            cues: cues_rx,
            shutdown: shutdown_tx,
        },
    )
}

impl<S: GameStore> SessionDriver<S> {
    pub async fn run(self) -> anyhow::Result<()> {
        let SessionDriver {
            store,
            config,
            mut actions,
            cues,
            mut shutdown,
        } = self;

        let row = store.fetch(&config.game_id).await?;
        let mut reconciler = GameStateReconciler::new(&row, config.perspective)?
            .with_abort_windows(
                config.abort_window_first_mover,
                config.abort_window_responder,
            );
        let mut clock = ClockEngine::new(row.time_control);
        let mut notify = store.subscribe();

        let mut abort_deadline: Option<Instant> = None;
        let fx = reconciler.start(Utc::now());
        dispatch(&*store, &config, &mut reconciler, &mut clock, &cues, &mut abort_deadline, fx).await;

        let mut ticker = tokio::time::interval(config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::debug!(game = %config.game_id, "session torn down");
                    break;
                }

                _ = ticker.tick() => {
                    let now = Instant::now();
                    let elapsed = now - last_tick;
                    last_tick = now;
                    for signal in clock.tick(elapsed) {
                        match signal {
                            ClockSignal::Timeout(color) => {
                                let fx = reconciler.handle(Event::ClockTimeout(color), Utc::now());
                                dispatch(&*store, &config, &mut reconciler, &mut clock, &cues, &mut abort_deadline, fx).await;
                            }
                            ClockSignal::LowTime(color) => {
                                if color == config.perspective {
                                    let _ = cues.try_send(SoundCue::LowTime);
                                }
                            }
                            ClockSignal::GameOver => {}
                        }
                    }
                }

                changed = notify.recv() => {
                    match changed {
                        Ok(id) if id == config.game_id => {
                            match store.fetch(&config.game_id).await {
                                Ok(row) => {
                                    let fx = reconciler.handle(Event::Update(row), Utc::now());
                                    dispatch(&*store, &config, &mut reconciler, &mut clock, &cues, &mut abort_deadline, fx).await;
                                }
                                Err(e) => tracing::warn!(game = %config.game_id, error = %e, "refetch failed"),
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(game = %config.game_id, skipped = n, "notification lag; refetching");
                            if let Ok(row) = store.fetch(&config.game_id).await {
                                let fx = reconciler.handle(Event::Update(row), Utc::now());
                                dispatch(&*store, &config, &mut reconciler, &mut clock, &cues, &mut abort_deadline, fx).await;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                action = actions.recv() => {
                    let Some(action) = action else { break };
                    let event = match action {
                        PlayerAction::Move { from, to, promotion } => Event::LocalMove {
                            from,
                            to,
                            promotion,
                            white_seconds: (!clock.is_untimed()).then(|| clock.white_seconds()),
                            black_seconds: (!clock.is_untimed()).then(|| clock.black_seconds()),
                        },
                        PlayerAction::Resign => Event::Resign,
                        PlayerAction::OfferDraw => Event::OfferDraw,
                        PlayerAction::AcceptDraw => Event::AcceptDraw,
                        PlayerAction::DeclineDraw => Event::DeclineDraw,
                    };
                    let fx = reconciler.handle(event, Utc::now());
                    dispatch(&*store, &config, &mut reconciler, &mut clock, &cues, &mut abort_deadline, fx).await;
                }

                _ = async move {
                    match abort_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => futures::future::pending().await,
                    }
                } => {
                    abort_deadline = None;
                    let fx = reconciler.handle(Event::AbortWindowExpired, Utc::now());
                    dispatch(&*store, &config, &mut reconciler, &mut clock, &cues, &mut abort_deadline, fx).await;
                }
            }
        }
        Ok(())
    }
}

/// Run one batch of effects, then reconcile from a fresh fetch whenever a
/// move submission failed, so the optimistic local move is rolled back
/// instead of leaving the board out of turn. Revert effects never submit
/// moves, so the loop terminates.
async fn dispatch<S: GameStore>(
    store: &S,
    config: &SessionConfig,
    reconciler: &mut GameStateReconciler,
    clock: &mut ClockEngine,
    cues: &mpsc::Sender<SoundCue>,
    abort_deadline: &mut Option<Instant>,
    mut fx: Vec<Effect>,
) {
    loop {
        if !apply_effects(store, config, clock, cues, abort_deadline, fx).await {
            return;
        }
        match store.fetch(&config.game_id).await {
            Ok(row) => fx = reconciler.handle(Event::Update(row), Utc::now()),
            Err(e) => {
                tracing::warn!(game = %config.game_id, error = %e, "resync fetch failed");
                return;
            }
        }
    }
}

/// Execute the reconciler's requested effects against the clock, timers and
/// store. Returns `true` when a move submission failed and the caller must
/// resync from the store; other write failures are logged and left for the
/// next reconciliation pass to correct.
async fn apply_effects<S: GameStore>(
    store: &S,
    config: &SessionConfig,
    clock: &mut ClockEngine,
    cues: &mpsc::Sender<SoundCue>,
    abort_deadline: &mut Option<Instant>,
    fx: Vec<Effect>,
) -> bool {
    let mut needs_resync = false;
    for effect in fx {
        match effect {
            Effect::StartAbortWindow(window) => {
                *abort_deadline = Some(Instant::now() + window);
            }
            Effect::CancelAbortWindow => {
                *abort_deadline = None;
            }
            Effect::SubmitMove(record) => {
                if let Err(e) = store.append_move(&config.game_id, &record).await {
                    tracing::warn!(game = %config.game_id, error = %e,
                        "move submission failed; resyncing from the store");
                    needs_resync = true;
                }
            }
            Effect::PlyAdvanced(ply) => clock.apply_ply(ply),
            Effect::ResyncClock {
                ply,
                white_seconds,
                black_seconds,
            } => clock.resync(ply, white_seconds, black_seconds),
            Effect::SyncPly(ply) => {
                let (w, b) = (clock.white_seconds(), clock.black_seconds());
                clock.resync(ply, w, b);
            }
            Effect::RecordResult {
                outcome,
                termination,
                ratings,
            } => match store
                .record_result(&config.game_id, outcome, termination.as_str(), ratings)
                .await
            {
                Ok(true) => {
                    tracing::info!(game = %config.game_id, ?outcome, %termination, "result recorded");
                }
                Ok(false) => {
                    tracing::debug!(game = %config.game_id, "result already recorded; no-op");
                }
                Err(e) => tracing::warn!(game = %config.game_id, error = %e, "result write failed"),
            },
            Effect::WriteDrawOffer(field) => {
                if let Err(e) = store.write_draw_offer(&config.game_id, &field).await {
                    tracing::warn!(game = %config.game_id, error = %e, "draw offer write failed");
                }
            }
            Effect::SetGameOver => clock.set_game_over(),
            Effect::Sound(cue) => {
                let _ = cues.try_send(cue);
            }
        }
    }
    needs_resync
}
