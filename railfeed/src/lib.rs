pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod stomp;
