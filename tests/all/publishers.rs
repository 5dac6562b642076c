use crate::helpers::{bind_temporary_queue, get_publisher_settings, receive};
use rbmq_publisher::amqp::configuration::PublisherSettings;
use rbmq_publisher::publishers::{HealthStatus, Publisher, PublisherError};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn a_published_message_reaches_a_bound_queue() {
    // Arrange
    let settings: PublisherSettings = serde_json::from_value(serde_json::json!({
        "addr": "localhost",
        "user": "guest",
        "user_password": "guest",
        "amqp_port": "5672",
        "management_port": "15672",
        "exchange": "ex1",
        "routing_key": "rk1",
        "log_mode": "all"
    }))
    .unwrap();
    let publisher = Publisher::connect(settings).await.unwrap();
    assert_eq!(HealthStatus::Healthy, publisher.status());
    let (_connection, mut consumer) = bind_temporary_queue("ex1", "rk1").await;

    // Act
    publisher.publish(b"hello").await.unwrap();

    // Assert
    let deliveries = receive(&mut consumer, 1).await;
    let delivery = &deliveries[0];
    assert_eq!(b"hello".to_vec(), delivery.data);
    assert_eq!(&Some(2), delivery.properties.delivery_mode());
    assert_eq!(
        Some("text/plain"),
        delivery
            .properties
            .content_type()
            .as_ref()
            .map(|c| c.as_str())
    );

    publisher.close().await;
}

#[tokio::test]
async fn concurrent_publishes_are_delivered_without_mixing_payloads() {
    // Arrange
    let exchange = Uuid::new_v4().to_string();
    let routing_key = Uuid::new_v4().to_string();
    let publisher = Arc::new(
        Publisher::connect(get_publisher_settings(&exchange, &routing_key))
            .await
            .unwrap(),
    );
    let (_connection, mut consumer) = bind_temporary_queue(&exchange, &routing_key).await;
    let sent: HashSet<String> = (0..64).map(|i| format!("{i}-{}", Uuid::new_v4())).collect();

    // Act
    let handles: Vec<_> = sent
        .iter()
        .cloned()
        .map(|body| {
            let publisher = Arc::clone(&publisher);
            tokio::spawn(async move { publisher.publish(body.as_bytes()).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Assert
    let received: HashSet<String> = receive(&mut consumer, sent.len())
        .await
        .into_iter()
        .map(|d| String::from_utf8(d.data).unwrap())
        .collect();
    assert_eq!(sent, received);
}

#[tokio::test]
async fn wrong_credentials_are_a_connection_error() {
    let settings = PublisherSettings {
        user_password: "not-the-password".to_owned().into(),
        ..get_publisher_settings("ex1", "rk1")
    };
    let mut publisher = Publisher::new();

    let outcome = publisher.initialize(settings).await;

    assert!(matches!(outcome, Err(PublisherError::ConnectionError(_))));
    assert!(matches!(
        publisher.publish(b"hello").await,
        Err(PublisherError::NotInitializedError)
    ));
}

#[tokio::test]
async fn redeclaring_an_exchange_with_another_type_fails() {
    // `amq.fanout` exists on every broker and is not a direct exchange.
    let mut publisher = Publisher::new();

    let outcome = publisher
        .initialize(get_publisher_settings("amq.fanout", "rk1"))
        .await;

    assert!(matches!(
        outcome,
        Err(PublisherError::ExchangeDeclarationError { .. })
    ));
    assert!(!publisher.is_initialized());
}
