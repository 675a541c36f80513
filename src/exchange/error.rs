//! Gateway error taxonomy.
//!
//! Every gateway failure is one of two kinds, and the lifecycle layer treats
//! them differently: transient failures are simply retried on the next
//! scheduled invocation with no state change, while venue rejections abort the
//! specific operation without persisting partial state.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure, timeout, or rate limiting. Safe to retry on the next
    /// scheduled cycle.
    #[error("transient gateway error: {0}")]
    Transient(String),

    /// The venue understood the request and refused it (invalid price, below
    /// minimum size, bad parameter). Retrying the identical request will fail
    /// the same way.
    #[error("venue rejected request (code {code}): {message}")]
    VenueRejection { code: i64, message: String },

    /// The venue answered with something we could not interpret.
    #[error("malformed venue response: {0}")]
    BadResponse(String),
}

impl GatewayError {
    /// Whether the next scheduled cycle may retry the same operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Transient(_) | GatewayError::BadResponse(_)
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transient(e.to_string())
    }
}
