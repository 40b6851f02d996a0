#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("invalid SAN move: {0:?}")]
    InvalidSan(String),

    #[error(transparent)]
    Wire(#[from] chess_core::WireError),
}
