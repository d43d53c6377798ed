//! Error taxonomy for the relay engine.

use std::io;
use thiserror::Error;

/// Failure retrieving or parsing one feed document. Isolated to the affected
/// feed URL for the current cycle; never escalated to process-fatal.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected HTTP status {0}")]
    Http(u16),

    #[error("feed parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Failure from the subscription store. `Persistence` means the durable write
/// did not happen; the in-memory mutation that triggered it has been rolled
/// back and memory still matches disk.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("destination {0} has no active subscription")]
    NotSubscribed(String),

    #[error("failed to persist subscription state: {0}")]
    Persistence(#[source] io::Error),

    #[error("state file is corrupt: {0}")]
    Corrupt(String),
}

/// Failure reported by a delivery sink. Transient failures are retried on the
/// next poll cycle; permanent ones count toward auto-unsubscribe.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }
}

/// Failure from the subscription command surface, surfaced to the caller for
/// user-visible feedback.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid feed URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::Http(503);
        assert_eq!(err.to_string(), "unexpected HTTP status 503");
    }

    #[test]
    fn test_not_subscribed_display() {
        let err = StoreError::NotSubscribed("chan-1".to_string());
        assert_eq!(
            err.to_string(),
            "destination chan-1 has no active subscription"
        );
    }

    #[test]
    fn test_delivery_error_classification() {
        assert!(DeliveryError::Permanent("gone".into()).is_permanent());
        assert!(!DeliveryError::Transient("busy".into()).is_permanent());
    }
}
