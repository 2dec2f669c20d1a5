//! Minimal STOMP client: enough of the protocol to log in, subscribe and receive.
mod codec;
mod connection;
mod frame;

pub use codec::{StompCodec, DEFAULT_MAX_FRAME_BYTES};
pub use connection::{broker_error, Credentials, FeedEvent, StompConnection};
pub use frame::{AckMode, Command, Frame};
