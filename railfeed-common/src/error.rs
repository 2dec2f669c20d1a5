use thiserror::Error;

/// Errors raised while resolving a topic against the static registry.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{topic} is not a known topic, expected one of: {known}")]
    UnknownTopic { topic: String, known: String },
}

/// Enumeration of errors for operations on a row sink.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("table {0} already exists and replacing it is disabled")]
    TableAlreadyExists(String),
    #[error("table {0} does not exist")]
    TableNotFound(String),
    #[error("the sink has already been closed")]
    SinkClosed,
    #[error("row has {got} values but table {table} has {expected} columns")]
    ArityMismatch {
        table: String,
        expected: usize,
        got: usize,
    },
    #[error("{command} failed with: {error}")]
    Database {
        command: String,
        error: sqlx::Error,
    },
}

impl SinkError {
    pub(crate) fn database(command: &str) -> impl FnOnce(sqlx::Error) -> Self + '_ {
        move |error| SinkError::Database {
            command: command.to_owned(),
            error,
        }
    }
}

/// A delivered message that could not be turned into rows.
/// The dispatcher skips these and keeps the subscription running.
#[derive(Error, Debug)]
pub enum MalformedMessage {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload has no {0} path")]
    MissingPath(String),
    #[error("unexpected payload shape: {0}")]
    UnexpectedShape(String),
}
