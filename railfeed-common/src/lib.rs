pub mod error;
pub mod flatten;
pub mod health;
pub mod metrics;
pub mod normalize;
pub mod row;
pub mod sink;
pub mod topics;
