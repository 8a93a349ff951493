use aem_store::StoreError;
use thiserror::Error;

/// Failures of a graph request.
///
/// `Clone` so a single refresh failure can be handed to every queued
/// completion.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("request to {path} failed: {message}")]
    Request { path: String, message: String },
    #[error("request to {path} returned status {status}")]
    Status { path: String, status: u16 },
    #[error("response from {path} could not be decoded: {message}")]
    Decode { path: String, message: String },
    #[error("request to {path} was abandoned before completing")]
    Abandoned { path: String },
}

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
