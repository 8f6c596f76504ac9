//! Error types for the synchronisation pipeline

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A watch stream could not be established. Fatal at startup.
#[derive(Debug, Error)]
#[error("failed to establish {resource} watch: {source}")]
pub struct ConnectError {
    pub resource: &'static str,
    #[source]
    pub source: BoxError,
    /// The requested resume version is no longer held by the server
    pub expired: bool,
}

impl ConnectError {
    pub fn new(resource: &'static str, source: impl Into<BoxError>) -> Self {
        Self {
            resource,
            source: source.into(),
            expired: false,
        }
    }

    pub fn expired(resource: &'static str, source: impl Into<BoxError>) -> Self {
        Self {
            expired: true,
            ..Self::new(resource, source)
        }
    }
}

/// Transient per-item failure; the item is skipped
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no metrics available for {0}")]
    NotAvailable(String),

    #[error("cluster API request failed: {0}")]
    Api(#[source] BoxError),
}

impl FetchError {
    pub fn api(source: impl Into<BoxError>) -> Self {
        FetchError::Api(source.into())
    }
}

/// Failure of a single broadcast
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("hub is shut down")]
    HubClosed,
}

/// Failure writing to one subscriber's transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport write failed: {0}")]
    Send(#[source] BoxError),
}

impl TransportError {
    pub fn send(source: impl Into<BoxError>) -> Self {
        TransportError::Send(source.into())
    }
}
