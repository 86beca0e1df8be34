//! Topic based publish and subscribe channels
//!
//! Topics are slash separated strings. Subscriptions use patterns which either name a topic
//! verbatim or end in a `*` that matches any (possibly empty) remainder, which is the subset of
//! glob patterns both Redis `PSUBSCRIBE` and the in-process broker agree on.

use crate::library::ErrorCode;
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

mod memory;
mod redis;

pub use self::redis::RedisTransport;
pub use memory::MemoryTransport;

/// Message received through a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Concrete topic the payload was published to
    pub topic: String,
    /// Raw payload
    pub payload: String,
}

/// Errors raised by a [`Transport`]
#[derive(Error, Debug)]
pub enum TransportError {
    /// Broker interaction failed
    #[error("broker operation failed")]
    Redis(#[from] ::redis::RedisError),
    /// Transport has been shut down and no longer accepts operations
    #[error("transport has been closed")]
    Closed,
}

impl TransportError {
    /// Result code classification of the error
    pub fn code(&self) -> ErrorCode {
        match self {
            TransportError::Redis(_) => ErrorCode::Failed,
            TransportError::Closed => ErrorCode::InvalidState,
        }
    }
}

/// Publish and subscribe channel between processes
///
/// Delivery is at-most-once. A subscription stream ends when the underlying connection is lost.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a payload to everybody subscribed to a matching pattern
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError>;

    /// Starts listening on every topic matching the pattern
    async fn subscribe(&self, pattern: &str)
        -> Result<BoxStream<'static, Delivery>, TransportError>;
}

/// Whether a topic matches a subscription pattern
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn match_exact_topics() {
        assert!(topic_matches("/SND/a/1", "/SND/a/1"));
        assert!(!topic_matches("/SND/a/1", "/SND/a/12"));
    }

    #[test]
    fn match_trailing_wildcards() {
        assert!(topic_matches("/SND/a/*", "/SND/a/42"));
        assert!(topic_matches("/SND/a/*", "/SND/a/"));
        assert!(!topic_matches("/SND/a/*", "/SND/ab/42"));
        assert!(!topic_matches("/SND/a/*", "/RSP/a/42"));
    }
}
