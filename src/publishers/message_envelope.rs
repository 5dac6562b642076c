use amq_protocol_types::ShortString;
use lapin::BasicProperties;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;
use uuid::Uuid;

/// Delivery mode: Non-persistent (1) or persistent (2).
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;
/// The content type attached to every published message.
pub const CONTENT_TYPE: &str = "text/plain";

/// A message, ready to be handed over to the broker by a [`Publisher`](super::Publisher).
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope {
    /// The body of the message - as a sequence of bytes.
    pub payload: Vec<u8>,
    /// The name of the exchange we are publishing the message to.
    pub exchange_name: String,
    /// The routing key used by the direct exchange to pick the bound queues.
    pub routing_key: String,
    /// AMQP properties attached to the message.
    pub properties: BasicProperties,
}

impl MessageEnvelope {
    /// Wrap `payload` as a persistent `text/plain` message, stamped with the current time
    /// and a fresh message id.
    pub fn new(payload: &[u8], exchange_name: &str, routing_key: &str) -> Self {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_content_type(ShortString::from(CONTENT_TYPE))
            .with_message_id(Uuid::new_v4().to_string().into());
        let properties = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(now) => properties.with_timestamp(now.as_secs()),
            Err(_) => {
                warn!("System time is before 1970");
                properties
            }
        };

        Self {
            payload: payload.to_vec(),
            exchange_name: exchange_name.to_owned(),
            routing_key: routing_key.to_owned(),
            properties,
        }
    }
}
