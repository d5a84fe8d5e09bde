//! Error types for the Castle client.

use thiserror::Error;

/// Result type for Castle client operations.
pub type Result<T> = std::result::Result<T, CastleError>;

/// Castle client errors.
///
/// Every error means "no recommendation available". Callers must not read an
/// error as an implicit deny.
#[derive(Debug, Error)]
pub enum CastleError {
    /// The request carried no [`Context`](crate::Context). Never sent over the wire.
    #[error("request.context cannot be empty")]
    MissingContext,

    /// Text that is neither an IPv4 nor an IPv6 literal
    #[error("address is not valid: {address:?}")]
    InvalidAddress { address: String },

    /// Connection failure, timeout, or request build failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-201 response from the API
    #[error("status code: {status}, message: {message}")]
    Api { status: u16, message: String },

    /// 201 response whose body carries an error `type` or `message`
    #[error("castle error ({kind}): {message}")]
    Remote { kind: String, message: String },

    /// 201 response whose body is not the expected JSON shape
    #[error("unable to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    /// Missing or invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl CastleError {
    /// True for errors raised locally before any network call.
    pub fn is_validation(&self) -> bool {
        matches!(self, CastleError::MissingContext)
    }

    /// HTTP status code returned by the API, if the call got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            CastleError::Api { status, .. } => Some(*status),
            CastleError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
