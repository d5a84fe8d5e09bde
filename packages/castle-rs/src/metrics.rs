//! Request counters exposed through the `metrics` facade.
//!
//! Nothing is exported unless the host application installs a recorder.

use metrics::counter;

const REQUESTS_TOTAL: &str = "castle_requests_total";

/// Castle endpoint a call was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Filter,
    Risk,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Filter => "filter",
            Endpoint::Risk => "risk",
        }
    }
}

/// Records one completed call.
#[inline]
pub fn record_request(endpoint: Endpoint, success: bool) {
    let status = if success { "ok" } else { "error" };
    counter!(REQUESTS_TOTAL, "endpoint" => endpoint.as_str(), "status" => status).increment(1);
}
