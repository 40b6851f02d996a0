use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("book error: {0}")]
    Book(#[from] bincode::Error),
}
