use thiserror::Error;

use crate::frame::FrameError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid frame: {0}")]
    Frame(#[from] FrameError),

    #[error("Statement returned no result set")]
    NoResultSet,

    #[error("Invalid load mode: {0}")]
    InvalidLoadMode(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),
}

pub type Result<T> = std::result::Result<T, Error>;
