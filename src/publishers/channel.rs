use crate::publishers::MessageEnvelope;
use lapin::{options::BasicPublishOptions, Channel, Connection};
use tracing::warn;

/// Reply code sent to the broker when we close our channel and connection on purpose.
const REPLY_SUCCESS: u16 = 200;

#[async_trait::async_trait]
/// Where a [`Publisher`](super::Publisher) sends its messages.
///
/// The live implementation is [`AmqpLink`]: an AMQP channel together with the connection it
/// is multiplexed on.
pub(crate) trait PublishChannel: Send + Sync {
    /// Hand the message over to the broker.
    ///
    /// It returns once the channel has accepted the message: it does not wait for a
    /// publisher confirmation.
    async fn publish(&self, envelope: &MessageEnvelope) -> Result<(), anyhow::Error>;

    /// `true` if the channel can still be used to publish.
    fn is_connected(&self) -> bool;

    /// Release the channel and the underlying resources.
    async fn close(&self);
}

/// An open AMQP channel along with the connection it belongs to.
///
/// It can only be built out of both, so a channel is never around without its connection.
pub(crate) struct AmqpLink {
    connection: Connection,
    channel: Channel,
}

impl AmqpLink {
    /// Pair `channel` with the `connection` it was opened on.
    pub(crate) fn new(connection: Connection, channel: Channel) -> Self {
        Self {
            connection,
            channel,
        }
    }
}

#[async_trait::async_trait]
impl PublishChannel for AmqpLink {
    #[tracing::instrument(level = "debug", skip(self, envelope), fields(exchange = %envelope.exchange_name, routing_key = %envelope.routing_key))]
    async fn publish(&self, envelope: &MessageEnvelope) -> Result<(), anyhow::Error> {
        // Mandatory is off: unroutable messages are silently dropped by the broker.
        // The immediate flag was dropped in RabbitMQ 3.0 - see https://www.rabbitmq.com/blog/2012/11/19/breaking-things-with-rabbitmq-3-0/
        let options = BasicPublishOptions {
            mandatory: false,
            immediate: false,
        };

        // The returned confirmation is dropped: the channel is not in confirm mode.
        let _confirm = self
            .channel
            .basic_publish(
                &envelope.exchange_name,
                &envelope.routing_key,
                options,
                &envelope.payload,
                envelope.properties.clone(),
            )
            .await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.channel.status().connected() && self.connection.status().connected()
    }

    async fn close(&self) {
        close_link(&self.connection, Some(&self.channel)).await;
    }
}

/// Close `channel` (if any) and then `connection`, logging failures.
pub(crate) async fn close_link(connection: &Connection, channel: Option<&Channel>) {
    if let Some(channel) = channel {
        if channel.status().connected() {
            if let Err(e) = channel.close(REPLY_SUCCESS, "publisher closed").await {
                warn!("Failed to close the RabbitMq channel: {:?}", e);
            }
        }
    }
    if connection.status().connected() {
        if let Err(e) = connection.close(REPLY_SUCCESS, "publisher closed").await {
            warn!("Failed to close the RabbitMq connection: {:?}", e);
        }
    }
}
