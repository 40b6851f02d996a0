//! Live game engine: clock, state reconciliation against the authoritative
//! move log, rating updates, and the analysis move tree.
//!
//! The core pieces (`ClockEngine`, `GameStateReconciler`, `RatingEstimator`,
//! `MoveTree`) are pure state machines fed synthetic events in tests; the
//! `session` module wires them to timers and a store behind tokio.

pub mod clock;
pub mod error;
pub mod movetree;
pub mod rating;
pub mod reconcile;
pub mod session;

pub use clock::{ClockEngine, ClockSignal};
pub use error::GameError;
pub use movetree::{MoveTree, NodeId};
pub use rating::{RatingEstimator, RatingSnapshot, RatingUpdate};
pub use reconcile::{Effect, Event, GameStateReconciler, Phase, SessionRow, SoundCue};
pub use session::{
    session, GameStore, MemoryStore, PlayerAction, SessionConfig, SessionDriver, SessionHandle,
    StoreError,
};
