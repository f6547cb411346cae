use crate::internal::*;
use crate::*;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::io::{FromRawFd, RawFd};
use std::sync::Arc;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use tokio::sync::mpsc::Sender;

/// The set of listening sockets owned by this process, together with the
/// event channel their connections report to.
pub struct ListenerCollection {
    listener_id_generator: ListenerIdGenerator,
    restored_id_generator: ConnectionIdGenerator,
    event_channel: Sender<ConnectionEvent>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    listeners: HashMap<ListenerId, Listener>,
}

impl ListenerCollection {
    pub fn new(event_channel: Sender<ConnectionEvent>) -> Self {
        Self {
            listener_id_generator: ListenerIdGenerator::new(1),
            restored_id_generator: ConnectionIdGenerator::new(ListenerId::RESTORED, 1),
            event_channel,
            tls_config: None,
            listeners: HashMap::new(),
        }
    }

    /// Start listening on the given address. Returns the id of the new
    /// listener and the address it actually bound to.
    pub async fn add_listener(
        &mut self,
        address: SocketAddr,
        conn_type: ConnectionType,
    ) -> Result<(ListenerId, SocketAddr), ListenerError> {
        let internal_type = match conn_type {
            ConnectionType::Clear => InternalConnectionType::Clear,
            ConnectionType::Tls => InternalConnectionType::Tls(
                self.tls_config.clone().ok_or(ListenerError::NoTlsConfig)?,
            ),
        };

        let id = self.listener_id_generator.next();
        let listener =
            Listener::bind(id, address, internal_type, self.event_channel.clone()).await?;
        let bound = listener.address;
        self.listeners.insert(id, listener);

        Ok((id, bound))
    }

    /// Stop accepting on a listener. Connections it accepted are unaffected.
    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.remove(&id);
    }

    /// Load the certificate and key used for subsequently added TLS listeners.
    pub fn load_tls_certificates(&mut self, settings: TlsSettings) -> Result<(), ListenerError> {
        let key = rustls::PrivateKey(settings.key);
        let certs: Vec<rustls::Certificate> = settings
            .cert_chain
            .into_iter()
            .map(rustls::Certificate)
            .collect();

        let first = certs
            .first()
            .ok_or_else(|| ListenerError::InvalidTlsConfig("empty certificate chain".to_string()))?;
        let client_cert_verifier = client_verifier::AcceptAnyClientCertVerifier::new(first);

        self.tls_config = Some(Arc::new(
            rustls::ServerConfig::builder()
                .with_safe_defaults()
                .with_client_cert_verifier(Arc::new(client_cert_verifier))
                .with_single_cert(certs, key)?,
        ));
        Ok(())
    }

    /// Resume management of a socket detached by [`Connection::freeze`],
    /// possibly in a previous process image.
    ///
    /// The peer address is re-read from the socket itself. Unlike accepted
    /// connections, no `NewConnection` event is sent; the caller receives the
    /// handle directly.
    ///
    /// # Safety
    ///
    /// `fd` must be an open stream socket that nothing else in this process
    /// owns.
    pub unsafe fn restore_connection(&self, fd: RawFd) -> Result<Connection, ConnectionError> {
        let std_stream = std::net::TcpStream::from_raw_fd(fd);
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        std_stream.set_nonblocking(true)?;

        let stream = tokio::net::TcpStream::from_std(std_stream)?;
        let id = self.restored_id_generator.next();

        tracing::debug!(conn = %id, fd, "Restoring connection");

        spawn_clear(id, stream, self.event_channel.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpStream,
        sync::mpsc::channel,
    };

    async fn accept_one(
        collection: &mut ListenerCollection,
        events: &mut tokio::sync::mpsc::Receiver<ConnectionEvent>,
    ) -> (Connection, TcpStream) {
        let (_, addr) = collection
            .add_listener("127.0.0.1:0".parse().unwrap(), ConnectionType::Clear)
            .await
            .unwrap();
        let client = TcpStream::connect(addr).await.unwrap();

        match events.recv().await.unwrap().detail {
            ConnectionEventDetail::NewConnection(conn) => (conn, client),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn lines_flow_both_ways() {
        let (send, mut events) = channel(16);
        let mut collection = ListenerCollection::new(send);
        let (conn, mut client) = accept_one(&mut collection, &mut events).await;

        client.write_all(b"NICK bob\r\n").await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.source, conn.id);
        assert!(matches!(event.detail, ConnectionEventDetail::Message(m) if m == "NICK bob"));

        conn.send("PING :hello\r\n".to_string());
        let mut reader = BufReader::new(&mut client);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "PING :hello\r\n");
    }

    #[tokio::test]
    async fn tls_listener_needs_config() {
        let (send, _events) = channel(16);
        let mut collection = ListenerCollection::new(send);

        let result = collection
            .add_listener("127.0.0.1:0".parse().unwrap(), ConnectionType::Tls)
            .await;
        assert!(matches!(result, Err(ListenerError::NoTlsConfig)));
    }

    #[tokio::test]
    async fn frozen_socket_can_be_restored() {
        let (send, mut events) = channel(16);
        let mut collection = ListenerCollection::new(send);
        let (conn, mut client) = accept_one(&mut collection, &mut events).await;
        let original_peer = conn.remote_addr;

        conn.send("NOTICE * :before\r\n".to_string());
        let fd = conn.freeze().await.unwrap();

        let flags = fcntl(fd, FcntlArg::F_GETFD).unwrap();
        assert!(!FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC));

        let restored = unsafe { collection.restore_connection(fd) }.unwrap();
        assert_eq!(restored.remote_addr, original_peer);
        assert_eq!(restored.id.listener(), ListenerId::RESTORED);

        restored.send("NOTICE * :after\r\n".to_string());

        let mut reader = BufReader::new(&mut client);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "NOTICE * :before\r\n");
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "NOTICE * :after\r\n");

        reader.get_mut().write_all(b"PING :x\r\n").await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.source, restored.id);
    }
}
