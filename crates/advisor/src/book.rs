//! In-memory opening book: normalized FEN -> opening name.
//!
//! The book is loaded from a binary file at first access. A missing or
//! corrupt file degrades to an empty book with a warning; lookups then
//! simply return nothing.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::LazyLock;

use chess_core::normalize_fen;

use crate::error::AdvisorError;

/// The entire book: normalized FEN -> opening name.
pub type OpeningBook = HashMap<String, String>;

/// Default path to the binary book file.
pub const BOOK_FILE_PATH: &str = "data/opening_book.bin";

/// Global book cache, loaded at first access.
pub static BOOK_CACHE: LazyLock<OpeningBook> = LazyLock::new(|| {
    match load_book(BOOK_FILE_PATH) {
        Ok(book) => {
            tracing::info!("Loaded opening book: {} positions", book.len());
            book
        }
        Err(e) => {
            tracing::warn!("Failed to load opening book from {}: {}", BOOK_FILE_PATH, e);
            HashMap::new()
        }
    }
});

pub fn load_book<P: AsRef<Path>>(path: P) -> Result<OpeningBook, AdvisorError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let book: OpeningBook = bincode::deserialize_from(reader)?;
    Ok(book)
}

pub fn save_book<P: AsRef<Path>>(book: &OpeningBook, path: P) -> Result<(), AdvisorError> {
    let file = File::create(path)?;
    bincode::serialize_into(file, book)?;
    Ok(())
}

/// Deepest known named opening for a line, given its positions most recent
/// first. The first position the book knows is by construction the deepest.
pub fn identify(fens_most_recent_first: &[String]) -> Option<&'static str> {
    identify_in(&BOOK_CACHE, fens_most_recent_first).map(|s| s.as_str())
}

/// Same lookup against an explicit book (testable without the global cache).
pub fn identify_in<'a>(
    book: &'a OpeningBook,
    fens_most_recent_first: &[String],
) -> Option<&'a String> {
    fens_most_recent_first
        .iter()
        .find_map(|fen| book.get(&normalize_fen(fen)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> OpeningBook {
        let mut book = HashMap::new();
        book.insert(
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3".to_string(),
            "King's Pawn Game".to_string(),
        );
        book.insert(
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6".to_string(),
            "Open Game".to_string(),
        );
        book
    }

    #[test]
    fn test_identify_deepest_first() {
        let fens = vec![
            // After 1. e4 e5 — known.
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6 0 2".to_string(),
            // After 1. e4 — shallower.
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1".to_string(),
        ];
        assert_eq!(
            identify_in(&book(), &fens).map(String::as_str),
            Some("Open Game")
        );
    }

    #[test]
    fn test_identify_falls_back_to_shallower() {
        let fens = vec![
            // After 1. e4 c5 — unknown to this tiny book.
            "rnbqkbnr/pp1ppppp/8/2p5/4P3/8/PPPP1PPP/RNBQKBNR w KQkq c6 0 2".to_string(),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1".to_string(),
        ];
        assert_eq!(
            identify_in(&book(), &fens).map(String::as_str),
            Some("King's Pawn Game")
        );
    }

    #[test]
    fn test_identify_unknown_line() {
        let fens = vec![chess_core::STARTING_FEN.to_string()];
        assert!(identify_in(&book(), &fens).is_none());
    }
}
