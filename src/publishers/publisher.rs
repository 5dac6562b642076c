use crate::amqp::configuration::{LogMode, MissingSettings, PublisherSettings};
use crate::amqp::ConnectionFactory;
use crate::publishers::channel::{close_link, AmqpLink};
use crate::publishers::{MessageEnvelope, PublishChannel};
use lapin::options::ExchangeDeclareOptions;
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Timeout applied to each publish unless [`PublisherBuilder::publish_timeout`] says otherwise.
pub const DEFAULT_PUBLISH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

/// Publishes messages on a single durable direct exchange, with a single routing key.
///
/// A `Publisher` starts empty. [`Publisher::initialize`] validates the settings, connects to
/// the broker, opens a channel and declares the exchange: either all of it succeeds or the
/// publisher stays unusable, and [`Publisher::publish`] fails with
/// [`PublisherError::NotInitializedError`] without touching the network.
///
/// # Delivery semantics
///
/// A successful [`Publisher::publish`] means the channel accepted the message. The channel
/// is not in confirm mode, so it does **not** mean the broker stored it. Messages are marked
/// persistent, but a failure after the channel accepted them goes unnoticed.
/// Nothing is retried: a failed or timed out publish must be treated as not delivered.
///
/// # Fault tolerance
///
/// There is none: if the connection breaks, every following publish fails until the
/// publisher is initialized again.
///
/// # Sharing
///
/// `publish` takes `&self`: wrap the publisher in an [`Arc`] to publish from many tasks.
/// The underlying channel serializes frame writes, concurrent publishes do not interleave.
///
/// # Example
///
/// ```rust,no_run
/// use rbmq_publisher::amqp::configuration::PublisherSettings;
/// use rbmq_publisher::publishers::Publisher;
///
/// async fn publish_hello() -> Result<(), Box<dyn std::error::Error>> {
///     let settings = PublisherSettings {
///         exchange: "ex1".into(),
///         routing_key: "rk1".into(),
///         ..Default::default()
///     };
///     let publisher = Publisher::connect(settings).await?;
///     publisher.publish(b"hello").await?;
///     publisher.close().await;
///     Ok(())
/// }
/// ```
pub struct Publisher {
    /// Timeout on publishing.
    timeout: std::time::Duration,
    /// Populated by a successful `initialize`.
    session: Option<Session>,
}

/// Everything a ready publisher owns.
struct Session {
    channel: Arc<dyn PublishChannel>,
    settings: PublisherSettings,
}

/// Whether a [`Publisher`] can currently publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Initialized, with both the channel and the connection open.
    Healthy,
    /// Not initialized yet, or the channel or the connection has been closed.
    Unhealthy,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher {
    /// An empty publisher, using the default publish timeout.
    /// It must be initialized before publishing.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building a [`Publisher`], e.g. to customise the publish timeout.
    pub fn builder() -> PublisherBuilder {
        PublisherBuilder::new()
    }

    /// Build a publisher with default options and initialize it with `settings`.
    pub async fn connect(settings: PublisherSettings) -> Result<Self, PublisherError> {
        let mut publisher = Self::new();
        publisher.initialize(settings).await?;
        Ok(publisher)
    }

    /// Validate `settings`, connect to the broker, open a channel and declare the exchange.
    ///
    /// The settings are moved into the publisher: the caller keeps no handle on them.
    ///
    /// Any session left over from a previous call is closed first. If any step fails, the
    /// resources opened so far are released and the publisher is left uninitialized.
    #[tracing::instrument(name = "rabbitmq_publisher_initialize", skip_all, fields(exchange = %settings.exchange))]
    pub async fn initialize(&mut self, settings: PublisherSettings) -> Result<(), PublisherError> {
        if let Some(previous) = self.session.take() {
            debug!("Closing the previous RabbitMq session before initializing again");
            previous.channel.close().await;
        }

        if let Err(e) = settings.validate() {
            error!(error = %e, "Refusing to initialize the RabbitMq publisher");
            return Err(e.into());
        }

        let factory = ConnectionFactory::new_from_config(&settings).map_err(|e| {
            error!(error = ?e, "Failed to connect to RabbitMq");
            PublisherError::ConnectionError(e)
        })?;
        let connection = factory.new_connection().await.map_err(|e| {
            error!(error = ?e, uri = %factory.redacted_uri(), "Failed to connect to RabbitMq");
            PublisherError::ConnectionError(e)
        })?;
        debug!("RabbitMq connection established");

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = ?e, "Failed to open a RabbitMq channel");
                close_link(&connection, None).await;
                return Err(PublisherError::ChannelError(e.into()));
            }
        };
        debug!("RabbitMq channel open");

        if let Err(e) = declare_exchange(&channel, &settings.exchange).await {
            error!(error = ?e, exchange = %settings.exchange, "Failed to declare the RabbitMq exchange");
            close_link(&connection, Some(&channel)).await;
            return Err(PublisherError::ExchangeDeclarationError {
                exchange: settings.exchange,
                source: e.into(),
            });
        }

        self.session = Some(Session {
            channel: Arc::new(AmqpLink::new(connection, channel)),
            settings,
        });
        trace!("RabbitMq publisher ready");
        Ok(())
    }

    /// Publish `payload` on the configured exchange with the configured routing key.
    ///
    /// The message is persistent, `text/plain`, timestamped with the current time and given
    /// a fresh message id.
    ///
    /// It fails with [`PublisherError::TimeoutError`] if the channel does not accept the
    /// message within the publish timeout (3 seconds by default).
    #[tracing::instrument(name = "rabbitmq_publish", level = "debug", skip_all, fields(payload_size = payload.len()))]
    pub async fn publish(&self, payload: &[u8]) -> Result<(), PublisherError> {
        let Some(session) = &self.session else {
            error!("Tried to publish with a RabbitMq publisher that was never initialized");
            return Err(PublisherError::NotInitializedError);
        };

        let envelope = MessageEnvelope::new(
            payload,
            &session.settings.exchange,
            &session.settings.routing_key,
        );

        match tokio::time::timeout(self.timeout, session.channel.publish(&envelope)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = ?e, "Failed to publish a message");
                Err(PublisherError::PublishError(e))
            }
            Err(_) => {
                error!(timeout = ?self.timeout, "Timed out while publishing a message");
                Err(PublisherError::TimeoutError)
            }
        }
    }

    /// `true` once `initialize` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// `Healthy` if the publisher is initialized and its channel is still open.
    pub fn status(&self) -> HealthStatus {
        match &self.session {
            Some(session) if session.channel.is_connected() => HealthStatus::Healthy,
            _ => HealthStatus::Unhealthy,
        }
    }

    /// The settings the publisher was initialized with.
    pub fn settings(&self) -> Option<&PublisherSettings> {
        self.session.as_ref().map(|s| &s.settings)
    }

    /// The configured log mode, [`LogMode::All`] if the publisher is not initialized.
    pub fn log_mode(&self) -> LogMode {
        self.settings()
            .map(PublisherSettings::log_mode)
            .unwrap_or_default()
    }

    /// Close the channel and the connection.
    pub async fn close(self) {
        if let Some(session) = self.session {
            session.channel.close().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn with_channel(
        settings: PublisherSettings,
        channel: Arc<dyn PublishChannel>,
    ) -> Self {
        let mut publisher = Self::new();
        publisher.session = Some(Session { channel, settings });
        publisher
    }

    #[cfg(test)]
    pub(crate) fn set_publish_timeout(&mut self, timeout: std::time::Duration) {
        self.timeout = timeout;
    }
}

/// Declare a durable direct exchange, waiting for the broker to acknowledge it.
#[tracing::instrument(level = "debug", skip(channel))]
async fn declare_exchange(channel: &Channel, exchange: &str) -> Result<(), lapin::Error> {
    let options = ExchangeDeclareOptions {
        passive: false,
        durable: true,
        auto_delete: false,
        internal: false,
        nowait: false,
    };
    channel
        .exchange_declare(exchange, ExchangeKind::Direct, options, FieldTable::default())
        .await
}

/// Error returned by [`Publisher`].
///
/// Nothing is retried on your behalf: every error is returned as soon as it happens.
#[derive(thiserror::Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum PublisherError {
    #[error("The RabbitMq publisher settings are invalid")]
    ConfigurationError(#[from] MissingSettings),
    #[error("Failed to connect to the RabbitMq broker")]
    ConnectionError(#[source] anyhow::Error),
    #[error("Failed to open a channel on the RabbitMq connection")]
    ChannelError(#[source] anyhow::Error),
    #[error("Failed to declare the `{exchange}` exchange")]
    ExchangeDeclarationError {
        exchange: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("The publisher must be initialized before publishing")]
    NotInitializedError,
    #[error("The timeout threshold was reached while trying to publish the message")]
    TimeoutError,
    #[error("Failed to publish the message to the RabbitMq broker")]
    PublishError(#[source] anyhow::Error),
}

/// A builder for [`Publisher`].
///
/// Use [`Publisher::builder`] as entrypoint.
pub struct PublisherBuilder {
    timeout: std::time::Duration,
}

impl PublisherBuilder {
    fn new() -> Self {
        Self {
            timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    /// Timeout applied when attempting to publish a message.
    /// Defaults to 3 seconds if left unspecified.
    #[must_use]
    pub fn publish_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Finalise the builder and get an (uninitialized) instance of [`Publisher`].
    pub fn build(self) -> Publisher {
        Publisher {
            timeout: self.timeout,
            session: None,
        }
    }
}
