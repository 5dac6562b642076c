use crate::amqp::configuration::LogMode;
use crate::publishers::Publisher;
use crate::telemetry::RequestRecord;
use axum::body::{Body, HttpBody};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{trace, warn};

/// Paths that are never republished.
pub const DEFAULT_SKIPPED_PATHS: [&str; 3] = ["/heartbeat", "/live", "/ready"];
/// Request bodies larger than this are forwarded untouched and left out of the record.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

const REQUEST_ID: &str = "x-request-id";

/// State for [`publish_request_telemetry`].
///
/// # Example
///
/// ```rust,no_run
/// use axum::{middleware, routing::get, Router};
/// use rbmq_publisher::publishers::Publisher;
/// use rbmq_publisher::telemetry::{publish_request_telemetry, RequestTelemetry};
/// use std::sync::Arc;
///
/// fn router(publisher: Arc<Publisher>) -> Router {
///     Router::new()
///         .route("/", get(|| async { "hello" }))
///         .layer(middleware::from_fn_with_state(
///             RequestTelemetry::new(publisher).max_in_flight(256),
///             publish_request_telemetry,
///         ))
/// }
/// ```
#[derive(Clone)]
pub struct RequestTelemetry {
    publisher: Arc<Publisher>,
    skipped_paths: Arc<Vec<String>>,
    body_limit: usize,
    in_flight: Option<Arc<Semaphore>>,
}

impl RequestTelemetry {
    /// Republish requests through `publisher`, following its log mode.
    ///
    /// By default there is no bound on the number of publishes in flight.
    pub fn new(publisher: Arc<Publisher>) -> Self {
        Self {
            publisher,
            skipped_paths: Arc::new(
                DEFAULT_SKIPPED_PATHS
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            ),
            body_limit: DEFAULT_BODY_LIMIT,
            in_flight: None,
        }
    }

    /// Replace the paths that are never republished.
    #[must_use]
    pub fn skipped_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.skipped_paths = Arc::new(paths.into_iter().map(Into::into).collect());
        self
    }

    /// The largest request body copied into the record, in bytes.
    ///
    /// Bodies that may exceed it (or whose length is unknown) reach the handler untouched and
    /// are recorded as empty, with an explanation in `err_log`.
    #[must_use]
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Cap the number of detached publishes running at the same time.
    /// Records produced while the cap is reached are dropped.
    #[must_use]
    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.in_flight = Some(Arc::new(Semaphore::new(max)));
        self
    }

    /// Path and method filters, known before the handler runs.
    fn is_observed(&self, method: &Method, path: &str) -> bool {
        !self.skipped_paths.iter().any(|p| p == path)
            && [Method::GET, Method::POST, Method::PUT, Method::DELETE].contains(method)
    }

    /// Log mode filter, known once the handler has answered.
    fn should_publish(&self, status: StatusCode) -> bool {
        self.publisher.log_mode() != LogMode::OnlyError || status.as_u16() >= 400
    }

    /// `None` when the in-flight cap is reached.
    fn reserve(&self) -> Option<Option<OwnedSemaphorePermit>> {
        match &self.in_flight {
            None => Some(None),
            Some(semaphore) => Arc::clone(semaphore).try_acquire_owned().ok().map(Some),
        }
    }

    /// Publish `record` on a detached task. Failures are only logged.
    fn spawn_publish(&self, record: RequestRecord) {
        let payload = match record.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize the request record");
                return;
            }
        };
        let Some(permit) = self.reserve() else {
            warn!(uri = %record.uri, "Too many request records in flight, dropping one");
            return;
        };
        let publisher = Arc::clone(&self.publisher);
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = publisher.publish(&payload).await {
                warn!(error = %e, uri = %record.uri, "Failed to publish the request record");
            }
        });
    }
}

/// Axum middleware publishing a [`RequestRecord`] for every completed request.
///
/// Use it with [`axum::middleware::from_fn_with_state`] and a [`RequestTelemetry`].
/// The response is returned untouched; the record is published on a detached task that is
/// not cancelled with the request.
///
/// Requests are skipped when their path is one of the skipped paths, when the method is not
/// GET, POST, PUT or DELETE, or when the publisher's log mode is `onlyError` and the
/// response status is below 400. Skipped paths and methods are forwarded without touching
/// the body. Other bodies are copied into the record when their length is known and within
/// [`RequestTelemetry::body_limit`]; the handler always receives the full body.
pub async fn publish_request_telemetry(
    State(telemetry): State<RequestTelemetry>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    if !telemetry.is_observed(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let (body, captured, err_log) = match body.size_hint().upper() {
        Some(size) if size <= telemetry.body_limit as u64 => {
            match axum::body::to_bytes(body, telemetry.body_limit).await {
                Ok(bytes) => (Body::from(bytes.clone()), bytes, None),
                Err(e) => {
                    warn!(error = %e, "Failed to read the request body");
                    return (StatusCode::BAD_REQUEST, "Failed to buffer the request body")
                        .into_response();
                }
            }
        }
        upper => {
            let reason = match upper {
                Some(size) => format!(
                    "request body of {size} bytes exceeds the {} bytes capture limit",
                    telemetry.body_limit
                ),
                None => "request body of unknown length was not captured".to_owned(),
            };
            (body, Default::default(), Some(reason))
        }
    };

    let method = parts.method.clone();
    let uri = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| parts.uri.path().to_owned());
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let request_id = header_value(&parts.headers, REQUEST_ID);
    let referrer = header_value(&parts.headers, header::HOST.as_str()).unwrap_or_default();
    let user_agent =
        header_value(&parts.headers, header::USER_AGENT.as_str()).unwrap_or_default();

    let response = next.run(Request::from_parts(parts, body)).await;

    let status = response.status();
    if !telemetry.should_publish(status) {
        return response;
    }
    trace!(uri = %uri, "Request completed, publishing its record");

    let record = RequestRecord {
        request_id: request_id.or_else(|| header_value(response.headers(), REQUEST_ID)),
        client_ip,
        latency: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        method: method.to_string(),
        uri,
        status: status.as_u16(),
        referrer,
        user_agent,
        request_body: String::from_utf8_lossy(&captured).into_owned(),
        err_log,
    };
    telemetry.spawn_publish(record);

    response
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}
