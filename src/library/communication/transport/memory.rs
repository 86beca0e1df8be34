use super::{topic_matches, Delivery, Transport, TransportError};
use crate::library::helpers::lock;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tracing::trace;

struct Subscriber {
    pattern: String,
    tx: UnboundedSender<Delivery>,
}

#[derive(Default)]
struct Broker {
    subscribers: Vec<Subscriber>,
    closed: bool,
}

/// In-process broker
///
/// Clones share the same broker, so handing one clone to each participant connects them
/// just like separate processes connected to the same Redis server.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    broker: Arc<Mutex<Broker>>,
}

impl MemoryTransport {
    /// Creates a new, empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Ends every subscription stream and rejects all further operations
    pub fn close(&self) {
        let mut broker = lock(&self.broker);
        broker.closed = true;
        broker.subscribers.clear();
    }

    /// Number of subscriptions whose stream is still being consumed
    pub fn subscriptions(&self) -> usize {
        let mut broker = lock(&self.broker);
        broker.subscribers.retain(|s| !s.tx.is_closed());
        broker.subscribers.len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        let mut broker = lock(&self.broker);

        if broker.closed {
            return Err(TransportError::Closed);
        }

        broker.subscribers.retain(|subscriber| {
            if !topic_matches(&subscriber.pattern, topic) {
                return !subscriber.tx.is_closed();
            }

            let delivery = Delivery {
                topic: topic.to_owned(),
                payload: payload.to_owned(),
            };

            subscriber.tx.unbounded_send(delivery).is_ok()
        });

        trace!(topic, "Published message");

        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
    ) -> Result<BoxStream<'static, Delivery>, TransportError> {
        let mut broker = lock(&self.broker);

        if broker.closed {
            return Err(TransportError::Closed);
        }

        let (tx, rx) = unbounded();
        broker.subscribers.push(Subscriber {
            pattern: pattern.to_owned(),
            tx,
        });

        Ok(rx.boxed())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn deliver_to_matching_subscriptions() {
        let transport = MemoryTransport::new();
        let mut requests = transport.subscribe("/SND/a/*").await.unwrap();
        let mut responses = transport.subscribe("/RSP/a/*").await.unwrap();

        transport.publish("/SND/a/1", "request").await.unwrap();
        transport.publish("/RSP/a/1", "response").await.unwrap();
        transport.publish("/SND/b/1", "unrelated").await.unwrap();

        assert_eq!(
            requests.next().await,
            Some(Delivery {
                topic: "/SND/a/1".into(),
                payload: "request".into()
            })
        );
        assert_eq!(responses.next().await.unwrap().payload, "response");

        drop(transport);
    }

    #[tokio::test]
    async fn forget_dropped_subscriptions() {
        let transport = MemoryTransport::new();
        let stream = transport.subscribe("/SND/a/*").await.unwrap();
        assert_eq!(transport.subscriptions(), 1);

        drop(stream);
        transport.publish("/SND/a/1", "lost").await.unwrap();

        assert_eq!(transport.subscriptions(), 0);
    }

    #[tokio::test]
    async fn end_streams_on_close() {
        let transport = MemoryTransport::new();
        let mut stream = transport.subscribe("/SND/a/*").await.unwrap();

        transport.close();

        assert_eq!(stream.next().await, None);
        assert!(matches!(
            transport.publish("/SND/a/1", "late").await,
            Err(TransportError::Closed)
        ));
    }
}
