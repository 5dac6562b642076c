//! These tests expect a RabbitMq broker listening on `localhost:5672` with the default
//! `guest`/`guest` credentials, e.g. `docker run -p 5672:5672 rabbitmq:3`.
mod helpers;
mod publishers;
