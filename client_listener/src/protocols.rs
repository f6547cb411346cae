use crate::error::*;
use crate::id::*;
use crate::Connection;

use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;
use tokio::sync::oneshot;

/// Information about a client connection's TLS status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsInfo {
    /// Hex-encoded SHA-1 fingerprint of the peer's certificate, if it sent one
    pub fingerprint: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    Clear,
    Tls,
}

/// The certificate chain and private key required to create a TLS listener.
///
/// Should be provided to
/// [`ListenerCollection::load_tls_certificates`](crate::ListenerCollection::load_tls_certificates).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TlsSettings {
    pub cert_chain: Vec<Vec<u8>>,
    pub key: Vec<u8>,
}

/// Instructions sent from a [`Connection`] handle to its connection task.
#[derive(Debug)]
pub enum ConnectionControl {
    /// Write a line (already terminated) to the socket
    Send(String),
    /// Flush pending output and close the socket
    Close,
    /// Flush pending output, stop the task, and hand back the raw socket
    /// without closing it
    Freeze(oneshot::Sender<Result<RawFd, ConnectionError>>),
}

/// Possible types of event that might occur on a given connection.
#[derive(Debug)]
pub enum ConnectionEventDetail {
    /// A new connection was accepted
    NewConnection(Connection),
    /// A new line was received
    Message(String),
    /// An error occurred, or the peer went away. No further events will
    /// follow for this connection.
    Error(ConnectionError),
}

/// An event notified via a `ListenerCollection`'s event channel.
#[derive(Debug)]
pub struct ConnectionEvent {
    /// The connection ID to which this event relates
    pub source: ConnectionId,
    /// The type of event and its content
    pub detail: ConnectionEventDetail,
}

impl ConnectionEvent {
    pub(crate) fn message(id: ConnectionId, message: String) -> Self {
        Self {
            source: id,
            detail: ConnectionEventDetail::Message(message),
        }
    }

    pub(crate) fn error(id: ConnectionId, error: ConnectionError) -> Self {
        Self {
            source: id,
            detail: ConnectionEventDetail::Error(error),
        }
    }

    pub(crate) fn new(id: ConnectionId, conn: Connection) -> Self {
        Self {
            source: id,
            detail: ConnectionEventDetail::NewConnection(conn),
        }
    }
}
