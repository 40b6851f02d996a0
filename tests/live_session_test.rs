mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shakmaty::{Color, Square};
use tokio::sync::broadcast;

use chess_core::{MoveRecord, Outcome, TimeControl};
use live_game::{
    session, GameStore, MemoryStore, PlayerAction, RatingUpdate, SessionConfig, SessionRow,
    SoundCue, StoreError,
};

fn sq(s: &str) -> Square {
    s.parse().unwrap()
}

fn seed(store: &Arc<MemoryStore>, rated: bool) {
    store.insert(SessionRow::new(
        "g1",
        "alice",
        "bob",
        TimeControl::new(300, 3),
        rated,
    ));
}

#[tokio::test(start_paused = true)]
async fn test_checkmate_over_live_session() {
    common::init_tracing();
    let store = Arc::new(MemoryStore::new());
    seed(&store, true);

    let (white_driver, mut white) = session(store.clone(), SessionConfig::new("g1", Color::White));
    let (black_driver, mut black) = session(store.clone(), SessionConfig::new("g1", Color::Black));
    tokio::spawn(white_driver.run());
    tokio::spawn(black_driver.run());

    // Fool's mate, played through both drivers against the shared store.
    let moves = [("f2", "f3"), ("e7", "e5"), ("g2", "g4"), ("d8", "h4")];
    for (i, (from, to)) in moves.iter().enumerate() {
        let (mover, observer) = if i % 2 == 0 {
            (&mut white, &mut black)
        } else {
            (&mut black, &mut white)
        };
        assert!(
            mover
                .act(PlayerAction::Move {
                    from: sq(from),
                    to: sq(to),
                    promotion: None,
                })
                .await
        );
        // The mover hears its own move; the observer hears it after
        // reconciling the pushed update.
        assert_eq!(mover.next_cue().await, Some(SoundCue::Move));
        assert_eq!(observer.next_cue().await, Some(SoundCue::Move));
    }

    let row = common::wait_for_row(&store, "g1", |r| r.result.is_some()).await;
    assert_eq!(row.result, Some(Outcome::BlackWins));
    assert_eq!(row.result.unwrap().pgn_tag(), "0-1");
    assert_eq!(row.termination.as_deref(), Some("Checkmate"));
    assert_eq!(row.moves.len(), 4);

    // White held the turn post-mate and performed the single result write.
    assert_eq!(store.result_write_count("g1"), 1);

    // Provisional players (fewer than 25 games) move by K = 15.
    assert_eq!(row.black_rating, 1507.5);
    assert_eq!(row.white_rating, 1492.5);
    assert_eq!(row.white_games, 1);
    assert_eq!(row.black_games, 1);

    assert_eq!(black.next_cue().await, Some(SoundCue::Victory));
    assert_eq!(white.next_cue().await, Some(SoundCue::Loss));

    white.shutdown();
    black.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_resignation_over_live_session() {
    common::init_tracing();
    let store = Arc::new(MemoryStore::new());
    seed(&store, false);

    let (white_driver, mut white) = session(store.clone(), SessionConfig::new("g1", Color::White));
    let (black_driver, mut black) = session(store.clone(), SessionConfig::new("g1", Color::Black));
    tokio::spawn(white_driver.run());
    tokio::spawn(black_driver.run());

    for (i, (from, to)) in [("e2", "e4"), ("e7", "e5")].iter().enumerate() {
        let (mover, observer) = if i % 2 == 0 {
            (&mut white, &mut black)
        } else {
            (&mut black, &mut white)
        };
        assert!(
            mover
                .act(PlayerAction::Move {
                    from: sq(from),
                    to: sq(to),
                    promotion: None,
                })
                .await
        );
        assert_eq!(mover.next_cue().await, Some(SoundCue::Move));
        assert_eq!(observer.next_cue().await, Some(SoundCue::Move));
    }

    assert!(black.act(PlayerAction::Resign).await);
    let row = common::wait_for_row(&store, "g1", |r| r.result.is_some()).await;
    assert_eq!(row.result, Some(Outcome::WhiteWins));
    assert_eq!(row.termination.as_deref(), Some("Resignation"));
    assert_eq!(store.result_write_count("g1"), 1);

    // Unrated game: ratings untouched.
    assert_eq!(row.white_rating, 1500.0);
    assert_eq!(row.white_games, 0);

    assert_eq!(black.next_cue().await, Some(SoundCue::Loss));
    assert_eq!(white.next_cue().await, Some(SoundCue::Victory));

    white.shutdown();
    black.shutdown();
}

/// Store whose next N appends fail, the way a hosted backend drops writes
/// under a transient network error. Everything else delegates.
struct FlakyStore {
    inner: MemoryStore,
    failing_appends: AtomicU32,
}

impl GameStore for FlakyStore {
    async fn fetch(&self, game_id: &str) -> Result<SessionRow, StoreError> {
        self.inner.fetch(game_id).await
    }

    async fn append_move(&self, game_id: &str, record: &MoveRecord) -> Result<(), StoreError> {
        let failing = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("append dropped".into()));
        }
        self.inner.append_move(game_id, record).await
    }

    async fn record_result(
        &self,
        game_id: &str,
        outcome: Outcome,
        termination: &str,
        ratings: Option<RatingUpdate>,
    ) -> Result<bool, StoreError> {
        self.inner
            .record_result(game_id, outcome, termination, ratings)
            .await
    }

    async fn write_draw_offer(&self, game_id: &str, field: &str) -> Result<(), StoreError> {
        self.inner.write_draw_offer(game_id, field).await
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inner.subscribe()
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_append_resyncs_and_allows_retry() {
    common::init_tracing();
    let inner = MemoryStore::new();
    inner.insert(SessionRow::new(
        "g1",
        "alice",
        "bob",
        TimeControl::new(300, 3),
        false,
    ));
    let store = Arc::new(FlakyStore {
        inner: inner.clone(),
        failing_appends: AtomicU32::new(1),
    });

    let (driver, mut white) = session(store.clone(), SessionConfig::new("g1", Color::White));
    tokio::spawn(driver.run());

    // The first submission is dropped by the store; the driver rolls the
    // optimistic move back from an authoritative refetch.
    assert!(
        white
            .act(PlayerAction::Move {
                from: sq("e2"),
                to: sq("e4"),
                promotion: None,
            })
            .await
    );
    assert_eq!(white.next_cue().await, Some(SoundCue::Move));

    // After the rollback it is white's turn again, so the retry goes through.
    assert!(
        white
            .act(PlayerAction::Move {
                from: sq("e2"),
                to: sq("e4"),
                promotion: None,
            })
            .await
    );
    let cue = tokio::time::timeout(Duration::from_secs(5), white.next_cue())
        .await
        .expect("retry was rejected; the failed append was never rolled back");
    assert_eq!(cue, Some(SoundCue::Move));

    let row = common::wait_for_row(&Arc::new(inner.clone()), "g1", |r| r.moves.len() == 1).await;
    assert_eq!(row.result, None);

    white.shutdown();
}
