//! Republish HTTP request telemetry through a [`Publisher`](crate::publishers::Publisher).
//! Check out [`publish_request_telemetry`] as a starting point.
mod middleware;
mod record;

pub use middleware::{
    publish_request_telemetry, RequestTelemetry, DEFAULT_BODY_LIMIT, DEFAULT_SKIPPED_PATHS,
};
pub use record::RequestRecord;
