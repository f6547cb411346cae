use crate::*;

use std::net::IpAddr;
use std::os::unix::io::RawFd;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::{mpsc::UnboundedSender, oneshot};

/// A handle to a connection being driven by its connection task.
///
/// Outbound lines are queued without blocking; the number of bytes queued but
/// not yet written to the socket is available from [`sendq_len`](Self::sendq_len).
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub conn_type: ConnectionType,
    pub remote_addr: IpAddr,
    pub tls_info: Option<TlsInfo>,
    sendq: Arc<AtomicUsize>,
    control_channel: UnboundedSender<ConnectionControl>,
}

impl Connection {
    /// Construct a handle around an arbitrary control channel.
    ///
    /// Connections accepted by a listener are created internally; this is
    /// public so that the receiving end of the channel can stand in for a
    /// socket, for instance when exercising session logic without a network.
    pub fn new(
        id: ConnectionId,
        conn_type: ConnectionType,
        remote_addr: IpAddr,
        tls_info: Option<TlsInfo>,
        control_channel: UnboundedSender<ConnectionControl>,
    ) -> Self {
        Self::with_sendq(
            id,
            conn_type,
            remote_addr,
            tls_info,
            control_channel,
            Arc::new(AtomicUsize::new(0)),
        )
    }

    pub(crate) fn with_sendq(
        id: ConnectionId,
        conn_type: ConnectionType,
        remote_addr: IpAddr,
        tls_info: Option<TlsInfo>,
        control_channel: UnboundedSender<ConnectionControl>,
        sendq: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            id,
            conn_type,
            remote_addr,
            tls_info,
            sendq,
            control_channel,
        }
    }

    /// Is this a TLS connection?
    pub fn is_tls(&self) -> bool {
        match self.conn_type {
            ConnectionType::Clear => false,
            ConnectionType::Tls => true,
        }
    }

    /// The client certificate fingerprint, if this is a TLS connection and
    /// the client presented one.
    pub fn certificate_fingerprint(&self) -> Option<&str> {
        self.tls_info.as_ref()?.fingerprint.as_deref()
    }

    /// Whether the connection task is still running
    pub fn is_open(&self) -> bool {
        !self.control_channel.is_closed()
    }

    /// Number of bytes queued for sending but not yet written
    pub fn sendq_len(&self) -> usize {
        self.sendq.load(Ordering::Relaxed)
    }

    fn send_control(&self, msg: ConnectionControl) -> bool {
        if let Err(e) = self.control_channel.send(msg) {
            tracing::debug!(conn = %self.id, "Error sending connection control message: {}", e);
            false
        } else {
            true
        }
    }

    /// Close the connection, after writing anything already queued.
    pub fn close(&self) {
        self.send_control(ConnectionControl::Close);
    }

    /// Queue the provided text to be sent to the connection. The text must
    /// already carry its line terminator.
    pub fn send(&self, msg: String) {
        let len = msg.len();
        self.sendq.fetch_add(len, Ordering::Relaxed);
        if !self.send_control(ConnectionControl::Send(msg)) {
            self.sendq.fetch_sub(len, Ordering::Relaxed);
        }
    }

    /// Stop the connection task and take ownership of the underlying socket.
    ///
    /// Everything queued before this call is written first. On success, the
    /// returned descriptor is open, no longer managed by the runtime, and has
    /// close-on-exec cleared. TLS connections cannot be frozen and return
    /// [`ConnectionError::FreezeUnsupported`], in which case the connection
    /// task is left running.
    pub async fn freeze(self) -> Result<RawFd, ConnectionError> {
        if self.is_tls() {
            return Err(ConnectionError::FreezeUnsupported);
        }

        let (send, recv) = oneshot::channel();
        self.control_channel.send(ConnectionControl::Freeze(send))?;
        recv.await.map_err(|_| ConnectionError::Closed)?
    }
}
