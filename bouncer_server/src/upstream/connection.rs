use super::ChannelTracker;

use bouncer_core::client_message::ClientMessage;
use bouncer_core::directory::UserSettings;
use bouncer_core::upstream::{ChannelCache, UpstreamEvent, UpstreamLink};
use bouncer_core::OrLog;
use client_listener::LineFramer;

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    select,
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

const READ_BUFFER_SIZE: usize = 4096;

/// Instructions from an [`UpstreamConnection`] handle to its task
#[derive(Debug)]
enum UpstreamControl {
    Line(String),
    Disconnect(String),
}

/// One user's connection to their IRC server.
///
/// The socket is owned by a background task, which registers, answers
/// `PING`, feeds the [`ChannelTracker`] and relays every other line as an
/// [`UpstreamEvent`]. There is no reconnection; once the task exits the
/// handle's writes are discarded.
pub struct UpstreamConnection {
    user: String,
    tracker: Arc<RwLock<ChannelTracker>>,
    control: UnboundedSender<UpstreamControl>,
}

impl UpstreamConnection {
    /// Create a link for `user` and the task that will drive it
    pub fn new(user: &UserSettings, events: UnboundedSender<UpstreamEvent>) -> (Arc<Self>, UpstreamTask) {
        let nick = user.nick.clone().unwrap_or_else(|| user.name.clone());
        let tracker = Arc::new(RwLock::new(ChannelTracker::new(&nick)));
        let (control_send, control_recv) = unbounded_channel();

        let task = UpstreamTask {
            user: user.name.clone(),
            nick,
            realname: user.realname.clone().unwrap_or_else(|| user.name.clone()),
            registered: false,
            tracker: Arc::clone(&tracker),
            control: control_recv,
            events,
        };

        let link = Arc::new(Self {
            user: user.name.clone(),
            tracker,
            control: control_send,
        });

        (link, task)
    }

    /// Create a link and start connecting it to `address` in the background
    pub fn connect(
        user: &UserSettings,
        address: String,
        events: UnboundedSender<UpstreamEvent>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (link, task) = Self::new(user, events);
        let handle = tokio::spawn(task.connect(address));
        (link, handle)
    }

    fn control(&self, msg: UpstreamControl) {
        if self.control.send(msg).is_err() {
            tracing::debug!(user = %self.user, "Upstream link is closed");
        }
    }
}

impl UpstreamLink for UpstreamConnection {
    fn write_line(&self, line: &str) {
        self.control(UpstreamControl::Line(line.to_string()));
    }

    fn server_name(&self) -> String {
        self.tracker.read().server_name().to_string()
    }

    fn current_nick(&self) -> String {
        self.tracker.read().nick().to_string()
    }

    fn channel(&self, name: &str) -> Option<ChannelCache> {
        self.tracker.read().channel(name)
    }

    fn channels(&self) -> Vec<String> {
        self.tracker.read().channels()
    }

    fn server_version(&self) -> Option<String> {
        self.tracker.read().version().map(str::to_string)
    }

    fn server_features(&self) -> Option<String> {
        self.tracker.read().features().map(str::to_string)
    }

    fn isupport(&self) -> Vec<(String, Option<String>)> {
        self.tracker.read().isupport().to_vec()
    }

    fn disconnect(&self, reason: &str) {
        self.control(UpstreamControl::Disconnect(reason.to_string()));
    }
}

/// The background half of an [`UpstreamConnection`]
pub struct UpstreamTask {
    user: String,
    nick: String,
    realname: String,
    registered: bool,
    tracker: Arc<RwLock<ChannelTracker>>,
    control: UnboundedReceiver<UpstreamControl>,
    events: UnboundedSender<UpstreamEvent>,
}

impl UpstreamTask {
    #[tracing::instrument(skip(self), fields(user = %self.user))]
    pub async fn connect(self, address: String) {
        match TcpStream::connect(&address).await {
            Ok(stream) => {
                tracing::info!("Connected to upstream server");
                self.run(stream).await;
            }
            Err(e) => self.finish(format!("Couldn't connect to {}: {}", address, e)),
        }
    }

    /// Register and process traffic over `stream` until either side closes it
    pub async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let reason = self.session(stream).await;
        self.finish(reason);
    }

    fn finish(self, reason: String) {
        tracing::info!(user = %self.user, %reason, "Upstream connection closed");
        self.events
            .send(UpstreamEvent::Disconnected {
                user: self.user,
                reason,
            })
            .or_log("notifying upstream disconnect");
    }

    async fn session<S>(&mut self, stream: S) -> String
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut framer = LineFramer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let registration = format!("NICK {}\r\nUSER {} 0 * :{}\r\n", self.nick, self.user, self.realname);
        if let Err(e) = writer.write_all(registration.as_bytes()).await {
            return e.to_string();
        }

        loop {
            select! {
                control = self.control.recv() => match control {
                    Some(UpstreamControl::Line(line)) => {
                        if let Err(e) = writer.write_all(format!("{}\r\n", line).as_bytes()).await {
                            return e.to_string();
                        }
                    }
                    Some(UpstreamControl::Disconnect(reason)) => {
                        let _ = writer.write_all(format!("QUIT :{}\r\n", reason).as_bytes()).await;
                        let _ = writer.shutdown().await;
                        return reason;
                    }
                    None => {
                        let _ = writer.write_all(b"QUIT\r\n").await;
                        return "Link dropped".to_string();
                    }
                },
                read = reader.read(&mut buf) => match read {
                    Ok(0) => return "Connection closed by server".to_string(),
                    Ok(len) => {
                        for line in framer.push(&buf[..len]) {
                            if let Some(reply) = self.handle_line(line) {
                                if let Err(e) = writer.write_all(format!("{}\r\n", reply).as_bytes()).await {
                                    return e.to_string();
                                }
                            }
                        }
                    }
                    Err(e) => return e.to_string(),
                }
            }
        }
    }

    /// Process one line from the server, returning any reply to send straight back
    fn handle_line(&mut self, line: String) -> Option<String> {
        let message = ClientMessage::parse(&line)?;

        match message.command.as_str() {
            "PING" => return Some(format!("PONG :{}", message.arg(0).unwrap_or_default())),
            "001" => self.registered = true,
            // Nickname in use; only ours to fix before registration completes
            "433" if !self.registered => {
                self.nick.push('_');
                return Some(format!("NICK {}", self.nick));
            }
            _ => (),
        }

        self.tracker.write().process(&line);
        self.events
            .send(UpstreamEvent::Line {
                user: self.user.clone(),
                line,
            })
            .or_log("relaying upstream line");
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn settings(name: &str) -> UserSettings {
        UserSettings {
            name: name.to_string(),
            password: String::new(),
            admin: false,
            suspended: false,
            nick: None,
            realname: Some("Alice Example".to_string()),
            upstream: None,
            host_allows: vec!["*".to_string()],
            certificates: Vec::new(),
        }
    }

    fn expect_line(event: Option<UpstreamEvent>) -> String {
        match event {
            Some(UpstreamEvent::Line { user, line }) => {
                assert_eq!(user, "alice");
                line
            }
            other => panic!("expected a relayed line, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn registers_and_relays() {
        let (events_send, mut events) = unbounded_channel();
        let (link, task) = UpstreamConnection::new(&settings("alice"), events_send);

        let (ours, theirs) = tokio::io::duplex(4096);
        let handle = tokio::spawn(task.run(ours));

        let (server_read, mut server_write) = tokio::io::split(theirs);
        let mut server_read = BufReader::new(server_read).lines();

        assert_eq!(server_read.next_line().await.unwrap().as_deref(), Some("NICK alice"));
        assert_eq!(
            server_read.next_line().await.unwrap().as_deref(),
            Some("USER alice 0 * :Alice Example")
        );

        server_write
            .write_all(b":irc.test 001 alice :Welcome\r\nPING :abc\r\n:irc.test 005 alice NETWORK=Test :are supported\r\n")
            .await
            .unwrap();

        assert_eq!(server_read.next_line().await.unwrap().as_deref(), Some("PONG :abc"));
        assert_eq!(expect_line(events.recv().await), ":irc.test 001 alice :Welcome");
        assert_eq!(
            expect_line(events.recv().await),
            ":irc.test 005 alice NETWORK=Test :are supported"
        );
        assert_eq!(link.server_name(), "irc.test");
        assert_eq!(link.isupport_value("network").as_deref(), Some("Test"));

        link.write_line("PRIVMSG #a :hi");
        assert_eq!(server_read.next_line().await.unwrap().as_deref(), Some("PRIVMSG #a :hi"));

        link.disconnect("bye");
        assert_eq!(server_read.next_line().await.unwrap().as_deref(), Some("QUIT :bye"));
        assert!(matches!(
            events.recv().await,
            Some(UpstreamEvent::Disconnected { user, reason }) if user == "alice" && reason == "bye"
        ));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn nick_collision_during_registration() {
        let (events_send, mut events) = unbounded_channel();
        let (link, task) = UpstreamConnection::new(&settings("alice"), events_send);

        let (ours, theirs) = tokio::io::duplex(4096);
        let handle = tokio::spawn(task.run(ours));

        let (server_read, mut server_write) = tokio::io::split(theirs);
        let mut server_read = BufReader::new(server_read).lines();
        server_read.next_line().await.unwrap();
        server_read.next_line().await.unwrap();

        server_write
            .write_all(b":irc.test 433 * alice :Nickname is already in use\r\n")
            .await
            .unwrap();
        assert_eq!(server_read.next_line().await.unwrap().as_deref(), Some("NICK alice_"));

        server_write.write_all(b":irc.test 001 alice_ :Welcome\r\n").await.unwrap();
        expect_line(events.recv().await);
        assert_eq!(link.current_nick(), "alice_");

        drop(server_write);
        drop(server_read);
        assert!(matches!(events.recv().await, Some(UpstreamEvent::Disconnected { .. })));
        handle.await.unwrap();
    }
}
