use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchivistError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

/// Failure of an ad-hoc statement. Shown to the operator as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("SQL Error: {message}")]
pub struct QueryError {
    pub message: String,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        QueryError {
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        QueryError::new(err.to_string())
    }
}
