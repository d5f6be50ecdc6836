//! Error types for Lexica

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LexicaError {
    #[error("Corpus not ready: {0}")]
    CorpusNotReady(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Task error: {0}")]
    Task(String),
}
