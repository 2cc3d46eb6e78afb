use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum MemoirError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("summarizer error: {0}")]
    Oracle(String),

    #[error("{0}")]
    Other(String),
}
