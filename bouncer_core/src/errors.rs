use client_listener::ConnectionError;
use thiserror::Error;

/// A connection's queue crossed its limit. The session has been killed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueOverflow {
    #[error("SendQ exceeded.")]
    SendQ,
    #[error("RecvQ exceeded.")]
    RecvQ,
}

/// Why a session can't be frozen
#[derive(Debug, Error)]
pub enum FreezeError {
    #[error("hostname lookup still in progress")]
    ResolutionPending,
    #[error("peer hostname not known")]
    NoHostname,
    #[error("no usable transport")]
    InvalidTransport,
    #[error("TLS sessions cannot be frozen")]
    TlsTransport,
    #[error("session is not authenticated")]
    NotAttached,
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}

/// Why a frozen session couldn't be restored
#[derive(Debug, Error)]
pub enum ThawError {
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("invalid descriptor {0}")]
    InvalidDescriptor(i64),
    #[error("no such user {0}")]
    UnknownUser(String),
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}
