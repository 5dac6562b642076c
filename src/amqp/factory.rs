use crate::amqp::configuration::PublisherSettings;
use lapin::{uri::AMQPUri, ConnectionProperties};
use tokio::time::timeout;
use tracing::{trace, warn};

#[derive(Clone)]
/// All the information required to connect to a RabbitMq broker.
pub struct ConnectionFactory {
    uri: AMQPUri,
    /// The timeout observed when trying to connect to RabbitMq.
    connection_timeout: std::time::Duration,
}

impl ConnectionFactory {
    /// Create a new connection factory from settings.
    ///
    /// A connection timeout can be (optionally) specified in `settings`.
    /// If the connection timeout is left unspecified, it will be defaulted to 10 seconds.
    ///
    /// It fails if the settings do not describe a valid AMQP uri (e.g. a non-numeric port).
    pub fn new_from_config(settings: &PublisherSettings) -> Result<Self, anyhow::Error> {
        let connection_timeout = settings
            .connection_timeout()
            .unwrap_or_else(|| std::time::Duration::from_secs(10));
        Ok(Self {
            uri: settings.amqp_uri()?,
            connection_timeout,
        })
    }

    /// The uri we connect to, with the password masked. Safe to log.
    pub fn redacted_uri(&self) -> String {
        let authority = &self.uri.authority;
        format!(
            "amqp://{}:***@{}:{}",
            authority.userinfo.username, authority.host, authority.port
        )
    }

    /// Create a new connection to a RabbitMq broker.
    #[tracing::instrument(name = "rabbitmq_connect", skip(self))]
    pub async fn new_connection(&self) -> Result<lapin::Connection, anyhow::Error> {
        trace!(uri = %self.redacted_uri(), "Connecting to RabbitMq");
        let properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        let connection = timeout(
            self.connection_timeout,
            lapin::Connection::connect_uri(self.uri.clone(), properties),
        )
        .await??;
        // Register a callback to log connection errors.
        connection.on_error(|e| {
            warn!("RabbitMQ broken connection: {:?}", e);
        });
        Ok(connection)
    }
}
