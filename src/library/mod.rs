//! Independent and project agnostic libraries
//!
//! Nothing in here knows about services, daemons or the wire protocol spoken by the [`hub`](super::hub).
//! The scheduler, the message document and the transports could be extracted into their own crates.

pub mod communication;
pub mod helpers;
pub mod scheduling;

mod error;

pub use error::ErrorCode;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
