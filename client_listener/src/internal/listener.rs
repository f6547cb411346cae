use crate::internal::*;
use crate::*;

use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use std::sync::{atomic::AtomicUsize, Arc};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    select,
    sync::{
        mpsc::{unbounded_channel, Sender},
        oneshot,
    },
};

#[derive(Clone)]
pub(crate) enum InternalConnectionType {
    Clear,
    Tls(Arc<rustls::ServerConfig>),
}

impl InternalConnectionType {
    pub fn to_pub(&self) -> ConnectionType {
        match self {
            InternalConnectionType::Clear => ConnectionType::Clear,
            InternalConnectionType::Tls(_) => ConnectionType::Tls,
        }
    }
}

/// A listening socket, accepting connections until dropped.
pub(crate) struct Listener {
    pub address: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

impl Listener {
    pub async fn bind(
        id: ListenerId,
        address: SocketAddr,
        connection_type: InternalConnectionType,
        event_channel: Sender<ConnectionEvent>,
    ) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(address).await?;
        let address = listener.local_addr()?;
        let (shutdown_send, shutdown_recv) = oneshot::channel();

        tracing::info!(?id, %address, conn_type = ?connection_type.to_pub(), "Listening");

        tokio::spawn(Self::listen_loop(
            id,
            listener,
            connection_type,
            event_channel,
            shutdown_recv,
        ));

        Ok(Self {
            address,
            _shutdown: shutdown_send,
        })
    }

    async fn listen_loop(
        listener_id: ListenerId,
        listener: TcpListener,
        connection_type: InternalConnectionType,
        event_channel: Sender<ConnectionEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let id_gen = ConnectionIdGenerator::new(listener_id, 1);

        loop {
            select! {
                res = listener.accept() => match res {
                    Ok((stream, _)) => {
                        let id = id_gen.next();
                        tokio::spawn(start_connection(id, stream, connection_type.clone(), event_channel.clone()));
                    }
                    Err(e) => {
                        tracing::error!(?listener_id, "Error accepting connection: {}", e);
                    }
                },
                _ = &mut shutdown => break,
            }
        }

        tracing::info!(?listener_id, "Listener closed");
    }
}

/// Start the task for a newly accepted (or restored) socket, and notify the
/// new connection on the event channel.
pub(crate) async fn start_connection(
    id: ConnectionId,
    stream: TcpStream,
    connection_type: InternalConnectionType,
    events: Sender<ConnectionEvent>,
) {
    let result = match connection_type {
        InternalConnectionType::Clear => spawn_clear(id, stream, events.clone()),
        InternalConnectionType::Tls(config) => spawn_tls(id, stream, config, events.clone()).await,
    };

    let event = match result {
        Ok(conn) => ConnectionEvent::new(id, conn),
        Err(e) => {
            tracing::debug!(conn = %id, "Error setting up connection: {}", e);
            return;
        }
    };

    if events.send(event).await.is_err() {
        tracing::error!(conn = %id, "Error sending new connection");
    }
}

pub(crate) fn spawn_clear(
    id: ConnectionId,
    stream: TcpStream,
    events: Sender<ConnectionEvent>,
) -> Result<Connection, ConnectionError> {
    let remote_addr = stream.peer_addr()?.ip();
    let (control_send, control_recv) = unbounded_channel();
    let sendq = Arc::new(AtomicUsize::new(0));

    let task = ConnectionTask::new(id, stream, sendq.clone(), control_recv, events);
    tokio::spawn(task.run());

    Ok(Connection::with_sendq(
        id,
        ConnectionType::Clear,
        remote_addr,
        None,
        control_send,
        sendq,
    ))
}

async fn spawn_tls(
    id: ConnectionId,
    stream: TcpStream,
    config: Arc<rustls::ServerConfig>,
    events: Sender<ConnectionEvent>,
) -> Result<Connection, ConnectionError> {
    let remote_addr = stream.peer_addr()?.ip();
    let acceptor = tokio_rustls::TlsAcceptor::from(config);
    let mut tls_stream = acceptor.accept(stream).await?;

    // Make sure the handshake has completed before asking for the peer's
    // certificate
    tls_stream.flush().await?;

    let fingerprint = tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|c| c.first())
        .map(|cert| {
            let mut hasher = Sha1::new();
            hasher.update(&cert.0);
            hex::encode(hasher.finalize())
        });

    let (control_send, control_recv) = unbounded_channel();
    let sendq = Arc::new(AtomicUsize::new(0));

    let task = ConnectionTask::new(id, tls_stream, sendq.clone(), control_recv, events);
    tokio::spawn(task.run());

    Ok(Connection::with_sendq(
        id,
        ConnectionType::Tls,
        remote_addr,
        Some(TlsInfo { fingerprint }),
        control_send,
        sendq,
    ))
}
