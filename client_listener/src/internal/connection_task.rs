use crate::*;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use std::os::unix::io::{IntoRawFd, RawFd};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    select,
    sync::mpsc::{Sender, UnboundedReceiver},
};

const READ_BUFFER_SIZE: usize = 4096;

/// A stream type that a connection task can run over
pub(crate) trait ConnectionStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Give up the runtime's ownership of the socket, returning a descriptor
    /// that stays open across `exec`.
    fn detach(self) -> Result<RawFd, ConnectionError>;
}

impl ConnectionStream for TcpStream {
    fn detach(self) -> Result<RawFd, ConnectionError> {
        let fd = self.into_std()?.into_raw_fd();
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
        Ok(fd)
    }
}

impl ConnectionStream for tokio_rustls::server::TlsStream<TcpStream> {
    fn detach(self) -> Result<RawFd, ConnectionError> {
        Err(ConnectionError::FreezeUnsupported)
    }
}

enum TaskExit {
    Closed(ConnectionError),
    Freeze(tokio::sync::oneshot::Sender<Result<RawFd, ConnectionError>>),
}

pub(crate) struct ConnectionTask<S> {
    id: ConnectionId,
    conn: S,
    sendq: Arc<AtomicUsize>,
    control_channel: UnboundedReceiver<ConnectionControl>,
    event_channel: Sender<ConnectionEvent>,
}

impl<S: ConnectionStream> ConnectionTask<S> {
    pub fn new(
        id: ConnectionId,
        stream: S,
        sendq: Arc<AtomicUsize>,
        control: UnboundedReceiver<ConnectionControl>,
        events: Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            id,
            conn: stream,
            sendq,
            control_channel: control,
            event_channel: events,
        }
    }

    pub async fn run(mut self) {
        let (mut reader, mut writer) = tokio::io::split(self.conn);
        let mut framer = LineFramer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let exit = loop {
            select! {
                control = self.control_channel.recv() => match control {
                    None | Some(ConnectionControl::Close) => break TaskExit::Closed(ConnectionError::Closed),
                    Some(ConnectionControl::Freeze(reply)) => break TaskExit::Freeze(reply),
                    Some(ConnectionControl::Send(msg)) => {
                        let result = writer.write_all(msg.as_bytes()).await;
                        self.sendq.fetch_sub(msg.len(), Ordering::Relaxed);
                        if let Err(e) = result {
                            break TaskExit::Closed(e.into());
                        }
                    }
                },
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break TaskExit::Closed(ConnectionError::Closed),
                    Ok(len) => {
                        let dropped_before = framer.oversized_lines();
                        for line in framer.push(&buf[..len]) {
                            if self.event_channel.send(ConnectionEvent::message(self.id, line)).await.is_err() {
                                tracing::error!(conn = %self.id, "Error notifying socket message");
                            }
                        }
                        if framer.oversized_lines() > dropped_before {
                            tracing::debug!(conn = %self.id, "Dropped oversized line");
                        }
                    }
                    Err(e) => break TaskExit::Closed(e.into()),
                }
            }
        };

        match exit {
            TaskExit::Freeze(reply) => {
                let result = match writer.flush().await {
                    Ok(()) => reader.unsplit(writer).detach(),
                    Err(e) => Err(e.into()),
                };
                tracing::debug!(conn = %self.id, ?result, "Detached connection");
                if reply.send(result).is_err() {
                    tracing::error!(conn = %self.id, "Freeze requester went away");
                }
            }
            TaskExit::Closed(error) => {
                let _ = writer.shutdown().await;
                tracing::debug!(conn = %self.id, "closing: {}", error);
                if self
                    .event_channel
                    .send(ConnectionEvent::error(self.id, error))
                    .await
                    .is_err()
                {
                    tracing::error!(conn = %self.id, "Error notifying connection closed");
                }
            }
        }
    }
}
