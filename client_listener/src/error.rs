use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// An error that might occur on a single connection.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,
    #[error("I/O Error: {0}")]
    IoError(String),
    #[error("Internal error")]
    InternalError,
    #[error("Connection type cannot be detached from its task")]
    FreezeUnsupported,
}

/// An error that might occur when configuring a listener.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ListenerError {
    #[error("TLS requested with no TLS config")]
    NoTlsConfig,
    #[error("Invalid TLS settings: {0}")]
    InvalidTlsConfig(String),
    #[error("I/O Error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ListenerError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

impl From<rustls::Error> for ListenerError {
    fn from(e: rustls::Error) -> Self {
        Self::InvalidTlsConfig(e.to_string())
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

impl From<nix::Error> for ConnectionError {
    fn from(e: nix::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

impl<T> From<SendError<T>> for ConnectionError {
    fn from(_: SendError<T>) -> Self {
        Self::Closed
    }
}
