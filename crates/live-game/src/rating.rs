//! Elo-style rating updates.
//!
//! A player's K-factor depends only on their own volume: a provisional tier
//! below [`ESTABLISHED_GAMES_THRESHOLD`] games and an established tier above
//! it. Unrated games never reach this module; the caller keeps prior ratings
//! unchanged.

use chess_core::Outcome;

/// Games played before a player counts as established.
pub const ESTABLISHED_GAMES_THRESHOLD: u32 = 25;

/// K-factor while below the threshold.
pub const PROVISIONAL_K: f64 = 15.0;

/// K-factor at or above the threshold.
pub const ESTABLISHED_K: f64 = 32.0;

/// A player's rating inputs, supplied by the external store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingSnapshot {
    pub rating: f64,
    pub games_played: u32,
}

impl RatingSnapshot {
    pub fn new(rating: f64, games_played: u32) -> Self {
        Self {
            rating,
            games_played,
        }
    }

    pub fn k_factor(&self) -> f64 {
        if self.games_played < ESTABLISHED_GAMES_THRESHOLD {
            PROVISIONAL_K
        } else {
            ESTABLISHED_K
        }
    }
}

/// New ratings for both sides, plus the pre-game "if this side wins"
/// projections used for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingUpdate {
    pub white_new: f64,
    pub black_new: f64,
    pub white_if_win: f64,
    pub black_if_win: f64,
}

pub struct RatingEstimator;

impl RatingEstimator {
    /// Logistic expected score for a player rated `rating` against `opponent`.
    pub fn expected_score(rating: f64, opponent: f64) -> f64 {
        1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
    }

    /// `R' = R + K * (S - E)` for one side.
    pub fn updated(snapshot: RatingSnapshot, opponent: f64, score: f64) -> f64 {
        let expected = Self::expected_score(snapshot.rating, opponent);
        snapshot.rating + snapshot.k_factor() * (score - expected)
    }

    /// Compute both new ratings from a decisive or drawn outcome. Returns
    /// `None` for `Aborted`, which carries no rating consequence.
    pub fn update(
        white: RatingSnapshot,
        black: RatingSnapshot,
        outcome: Outcome,
    ) -> Option<RatingUpdate> {
        let (white_score, black_score) = match outcome {
            Outcome::WhiteWins => (1.0, 0.0),
            Outcome::BlackWins => (0.0, 1.0),
            Outcome::Draw => (0.5, 0.5),
            Outcome::Aborted => return None,
        };
        Some(RatingUpdate {
            white_new: Self::updated(white, black.rating, white_score),
            black_new: Self::updated(black, white.rating, black_score),
            white_if_win: Self::updated(white, black.rating, 1.0),
            black_if_win: Self::updated(black, white.rating, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_score_symmetry() {
        let e = RatingEstimator::expected_score(1500.0, 1500.0);
        assert_eq!(e, 0.5);
        let higher = RatingEstimator::expected_score(1700.0, 1500.0);
        let lower = RatingEstimator::expected_score(1500.0, 1700.0);
        assert!((higher + lower - 1.0).abs() < 1e-12);
        assert!(higher > 0.5);
    }

    #[test]
    fn test_equal_ratings_decisive_provisional() {
        let white = RatingSnapshot::new(1500.0, 10);
        let black = RatingSnapshot::new(1500.0, 10);
        let update = RatingEstimator::update(white, black, Outcome::WhiteWins).unwrap();
        assert_eq!(update.white_new, 1500.0 + PROVISIONAL_K * 0.5);
        assert_eq!(update.black_new, 1500.0 - PROVISIONAL_K * 0.5);
    }

    #[test]
    fn test_k_factor_split_per_side() {
        // White provisional, black established; each side uses its own K.
        let white = RatingSnapshot::new(1500.0, 24);
        let black = RatingSnapshot::new(1500.0, 25);
        let update = RatingEstimator::update(white, black, Outcome::BlackWins).unwrap();
        assert_eq!(update.white_new, 1500.0 - PROVISIONAL_K * 0.5);
        assert_eq!(update.black_new, 1500.0 + ESTABLISHED_K * 0.5);
    }

    #[test]
    fn test_draw_moves_unequal_ratings_together() {
        let white = RatingSnapshot::new(1600.0, 40);
        let black = RatingSnapshot::new(1400.0, 40);
        let update = RatingEstimator::update(white, black, Outcome::Draw).unwrap();
        assert!(update.white_new < 1600.0);
        assert!(update.black_new > 1400.0);
    }

    #[test]
    fn test_if_win_projection_regardless_of_outcome() {
        let white = RatingSnapshot::new(1500.0, 30);
        let black = RatingSnapshot::new(1500.0, 30);
        let update = RatingEstimator::update(white, black, Outcome::BlackWins).unwrap();
        assert_eq!(update.white_if_win, 1500.0 + ESTABLISHED_K * 0.5);
        assert_eq!(update.black_if_win, 1500.0 + ESTABLISHED_K * 0.5);
    }

    #[test]
    fn test_aborted_has_no_rating_effect() {
        let snap = RatingSnapshot::new(1500.0, 30);
        assert!(RatingEstimator::update(snap, snap, Outcome::Aborted).is_none());
    }
}
