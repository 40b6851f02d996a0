//! Persisted wire formats. These strings live in the authoritative store and
//! must round-trip exactly:
//!
//! - move record: `"<from>$<to>$<isoTimestamp>[$<whiteSecs>$<blackSecs>]"`
//! - draw offer:  empty, `"<playerId>"`, or `"<playerId>$<otherPlayerId>"`
//! - time control: `"<minutes>+<incrementSeconds>"`, e.g. `"5+3"`

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use shakmaty::Square;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed move record: {0:?}")]
    MalformedRecord(String),

    #[error("bad square: {0:?}")]
    BadSquare(String),

    #[error("bad time control: {0:?}")]
    BadTimeControl(String),

    #[error("illegal move {from}{to} at ply {ply}")]
    IllegalMove {
        ply: usize,
        from: Square,
        to: Square,
    },
}

/// One appended move, as stored in the authoritative log. Immutable once
/// appended; its index in the log is its ply number.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveRecord {
    pub from: Square,
    pub to: Square,
    /// `None` when the stored timestamp was unparseable; the clock resync
    /// then degrades to "no wall-clock adjustment".
    pub timestamp: Option<DateTime<Utc>>,
    pub white_seconds: Option<f64>,
    pub black_seconds: Option<f64>,
}

impl MoveRecord {
    pub fn new(from: Square, to: Square, timestamp: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            timestamp: Some(timestamp),
            white_seconds: None,
            black_seconds: None,
        }
    }

    pub fn with_clocks(mut self, white_seconds: f64, black_seconds: f64) -> Self {
        self.white_seconds = Some(white_seconds);
        self.black_seconds = Some(black_seconds);
        self
    }

    /// Encode to the `$`-delimited store format.
    pub fn encode(&self) -> String {
        let ts = self
            .timestamp
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default();
        match (self.white_seconds, self.black_seconds) {
            (Some(w), Some(b)) => format!("{}${}${}${}${}", self.from, self.to, ts, w, b),
            _ => format!("{}${}${}", self.from, self.to, ts),
        }
    }

    /// Decode a `$`-delimited record. Unparseable squares are a hard error;
    /// unparseable time fields degrade to `None` with a warning, since a
    /// record without timing still replays.
    pub fn decode(raw: &str) -> Result<Self, WireError> {
        let parts: Vec<&str> = raw.split('$').collect();
        if parts.len() < 3 {
            return Err(WireError::MalformedRecord(raw.to_string()));
        }
        let from: Square = parts[0]
            .parse()
            .map_err(|_| WireError::BadSquare(parts[0].to_string()))?;
        let to: Square = parts[1]
            .parse()
            .map_err(|_| WireError::BadSquare(parts[1].to_string()))?;

        let timestamp = match DateTime::parse_from_rfc3339(parts[2]) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(_) => {
                tracing::warn!(record = raw, "move record has unparseable timestamp");
                None
            }
        };

        let (white_seconds, black_seconds) = if parts.len() >= 5 {
            match (parts[3].parse::<f64>(), parts[4].parse::<f64>()) {
                (Ok(w), Ok(b)) => (Some(w), Some(b)),
                _ => {
                    tracing::warn!(record = raw, "move record has unparseable clock fields");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        Ok(Self {
            from,
            to,
            timestamp,
            white_seconds,
            black_seconds,
        })
    }
}

/// Draw-offer field state. One id means an outstanding offer from that
/// participant; two ids mean both agreed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOffer {
    None,
    Outstanding(String),
    Accepted(String, String),
}

impl DrawOffer {
    pub fn decode(field: &str) -> Self {
        if field.is_empty() {
            return DrawOffer::None;
        }
        match field.split_once('$') {
            Some((a, b)) => DrawOffer::Accepted(a.to_string(), b.to_string()),
            None => DrawOffer::Outstanding(field.to_string()),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            DrawOffer::None => String::new(),
            DrawOffer::Outstanding(id) => id.clone(),
            DrawOffer::Accepted(a, b) => format!("{a}${b}"),
        }
    }

    pub fn offered_by(&self, id: &str) -> bool {
        match self {
            DrawOffer::None => false,
            DrawOffer::Outstanding(a) => a == id,
            DrawOffer::Accepted(a, b) => a == id || b == id,
        }
    }
}

/// Parsed time control. `initial_seconds == 0` means the game is untimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    pub initial_seconds: u64,
    pub increment_seconds: u64,
}

impl TimeControl {
    pub const UNTIMED: TimeControl = TimeControl {
        initial_seconds: 0,
        increment_seconds: 0,
    };

    pub fn new(initial_seconds: u64, increment_seconds: u64) -> Self {
        Self {
            initial_seconds,
            increment_seconds,
        }
    }

    pub fn is_untimed(&self) -> bool {
        self.initial_seconds == 0
    }

    /// Parse "minutes+increment" ("5+3" → 300s + 3s). A bare "5" means no
    /// increment; "0" is untimed.
    pub fn parse(s: &str) -> Result<Self, WireError> {
        let bad = || WireError::BadTimeControl(s.to_string());
        let (minutes, increment) = match s.split_once('+') {
            Some((m, i)) => (
                m.trim().parse::<u64>().map_err(|_| bad())?,
                i.trim().parse::<u64>().map_err(|_| bad())?,
            ),
            None => (s.trim().parse::<u64>().map_err(|_| bad())?, 0),
        };
        Ok(Self {
            initial_seconds: minutes * 60,
            increment_seconds: increment,
        })
    }
}

impl std::fmt::Display for TimeControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}+{}",
            self.initial_seconds / 60,
            self.increment_seconds
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    #[test]
    fn test_move_record_round_trip() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();
        let rec = MoveRecord::new(sq("e2"), sq("e4"), ts).with_clocks(297.4, 300.0);
        let encoded = rec.encode();
        assert_eq!(encoded, "e2$e4$2025-06-01T12:30:00.000Z$297.4$300");
        let decoded = MoveRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn test_move_record_without_clocks() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();
        let rec = MoveRecord::new(sq("g8"), sq("f6"), ts);
        let decoded = MoveRecord::decode(&rec.encode()).unwrap();
        assert_eq!(decoded.white_seconds, None);
        assert_eq!(decoded.black_seconds, None);
    }

    #[test]
    fn test_malformed_time_fields_degrade() {
        let decoded = MoveRecord::decode("e2$e4$not-a-date$garbage$300").unwrap();
        assert_eq!(decoded.from, sq("e2"));
        assert!(decoded.timestamp.is_none());
        assert!(decoded.white_seconds.is_none());
    }

    #[test]
    fn test_bad_square_is_an_error() {
        assert!(MoveRecord::decode("z9$e4$2025-06-01T12:30:00Z").is_err());
        assert!(MoveRecord::decode("e4").is_err());
    }

    #[test]
    fn test_draw_offer_lifecycle() {
        assert_eq!(DrawOffer::decode(""), DrawOffer::None);
        assert_eq!(
            DrawOffer::decode("alice"),
            DrawOffer::Outstanding("alice".into())
        );
        assert_eq!(
            DrawOffer::decode("alice$bob"),
            DrawOffer::Accepted("alice".into(), "bob".into())
        );
        let accepted = DrawOffer::Accepted("alice".into(), "bob".into());
        assert_eq!(DrawOffer::decode(&accepted.encode()), accepted);
    }

    #[test]
    fn test_time_control_parse() {
        let tc = TimeControl::parse("5+3").unwrap();
        assert_eq!(tc.initial_seconds, 300);
        assert_eq!(tc.increment_seconds, 3);
        assert_eq!(tc.to_string(), "5+3");

        let bullet = TimeControl::parse("1+0").unwrap();
        assert_eq!(bullet.initial_seconds, 60);

        assert!(TimeControl::parse("5+3").unwrap() == TimeControl::new(300, 3));
        assert!(TimeControl::parse("blitz").is_err());
        assert!(TimeControl::parse("0").unwrap().is_untimed());
    }
}
