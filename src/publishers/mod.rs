//! Facilities to publish messages to a RabbitMq exchange. Check out [`Publisher`] as a starting point.
mod channel;
mod message_envelope;
mod publisher;

pub(crate) use channel::PublishChannel;
pub use message_envelope::{MessageEnvelope, CONTENT_TYPE, PERSISTENT_DELIVERY_MODE};
pub use publisher::{
    HealthStatus, Publisher, PublisherBuilder, PublisherError, DEFAULT_PUBLISH_TIMEOUT,
};

#[cfg(test)]
pub(crate) mod testing;
