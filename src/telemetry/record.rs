use serde::{Deserialize, Serialize};

/// What we publish about a completed HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// The `x-request-id` header, taken from the request or, failing that, from the response.
    pub request_id: Option<String>,
    /// The peer socket address as `ip:port`, empty if the server was not built with
    /// connect info.
    pub client_ip: String,
    /// Time spent in the inner service, in milliseconds.
    pub latency: u64,
    pub method: String,
    /// Path and query.
    pub uri: String,
    pub status: u16,
    /// The `Host` header.
    pub referrer: String,
    pub user_agent: String,
    /// The request body, lossily decoded as UTF-8.
    pub request_body: String,
    /// Why the request body was left out of the record, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_log: Option<String>,
}

impl RequestRecord {
    /// The message body handed over to the publisher.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
