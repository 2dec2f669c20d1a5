use railfeed_common::error::{MalformedMessage, RegistryError, SinkError};
use thiserror::Error;

/// Enumeration of errors raised by the STOMP transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed STOMP frame: {0}")]
    Protocol(String),
    #[error("STOMP frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
    #[error("broker refused the connection: {message}")]
    Refused { message: String, body: String },
    #[error("broker reported an error: {message}")]
    Broker { message: String, body: String },
    #[error("expected {expected} from the broker but the connection closed")]
    ConnectionClosed { expected: &'static str },
    #[error("expected {expected} from the broker, got {got}")]
    UnexpectedFrame { expected: &'static str, got: String },
}

/// Settings that parse but cannot drive a session.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("LIVENESS_INTERVAL must be greater than zero")]
    ZeroLivenessInterval,
}

/// Enumeration of errors that stop a feed session.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    UnknownTopic(#[from] RegistryError),
    #[error("row sink failed: {0}")]
    Sink(#[from] SinkError),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
}

/// Why a single delivered message produced no rows, or only some of them.
/// Neither variant stops the session.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dropped malformed message: {0}")]
    Malformed(#[from] MalformedMessage),
    #[error("failed to write row: {0}")]
    Sink(#[from] SinkError),
}
