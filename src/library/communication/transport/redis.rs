use super::{Delivery, Transport, TransportError};
use async_trait::async_trait;
use futures::future::ready;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Msg};
use tracing::{debug, warn};

/// [`Transport`] implementation using Redis [pub/sub](https://redis.io/topics/pubsub)
///
/// Publishing shares one multiplexed connection. Every subscription opens its own connection
/// as a connection in subscriber mode can not issue regular commands.
#[derive(Clone)]
pub struct RedisTransport {
    client: Client,
    publisher: MultiplexedConnection,
}

impl RedisTransport {
    /// Connects to the server behind the given URL
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = Client::open(url)?;
        let publisher = client.get_multiplexed_tokio_connection().await?;

        debug!(url, "Connected to redis");

        Ok(Self { client, publisher })
    }
}

fn into_delivery(msg: Msg) -> Option<Delivery> {
    match msg.get_payload::<String>() {
        Ok(payload) => Some(Delivery {
            topic: msg.get_channel_name().to_owned(),
            payload,
        }),
        Err(e) => {
            warn!(channel = msg.get_channel_name(), ?e, "Dropping non-text payload");
            None
        }
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        let mut con = self.publisher.clone();
        con.publish::<_, _, ()>(topic, payload).await?;

        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
    ) -> Result<BoxStream<'static, Delivery>, TransportError> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.psubscribe(pattern).await?;

        debug!(pattern, "Subscribed to redis channel pattern");

        Ok(pubsub
            .into_on_message()
            .filter_map(|msg| ready(into_delivery(msg)))
            .boxed())
    }
}
