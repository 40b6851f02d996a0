//! Advisory surfaces for the analysis board: opening-book identification and
//! a streaming UCI engine feed. Both are informational only; their absence
//! or failure never blocks game flow.

pub mod book;
pub mod engine;
pub mod error;

pub use book::{identify, load_book, save_book, OpeningBook};
pub use engine::{AnalysisHandle, EngineLine, UciEngine};
pub use error::AdvisorError;
