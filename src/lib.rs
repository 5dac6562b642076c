//! `rbmq-publisher` is a small publisher, built on top of [`lapin`], to send messages to a
//! single durable direct exchange on RabbitMq.
//!
//! [`Publisher`](crate::publishers::Publisher) is the best starting point. The
//! [`telemetry`] module plugs it into an `axum` router to republish every completed HTTP request.

pub mod amqp;
pub mod publishers;
pub mod telemetry;
