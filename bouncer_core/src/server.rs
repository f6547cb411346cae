//! The event loop tying listeners, hostname lookups, upstream links and
//! client sessions together.

use crate::command::{CommandAction, CommandContext, ShutdownAction};
use crate::directory::UserDirectory;
use crate::errors::ThawError;
use crate::freeze::{FreezeRefused, FreezeStore, KEY_FD};
use crate::messages::RawLine;
use crate::router;
use crate::session::ClientSession;
use crate::session_collection::SessionCollection;
use crate::settings::BouncerSettings;
use crate::upstream::UpstreamEvent;

use client_listener::*;
use dns_client::{DnsClient, DnsResult, ReverseResolver};

use serde::{Deserialize, Serialize};
use std::os::unix::io::{FromRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    select,
    sync::{
        broadcast,
        mpsc::{channel, unbounded_channel, Receiver, UnboundedReceiver},
    },
};

const CONNECTION_EVENT_QUEUE: usize = 256;

/// Sent to clients that can't be carried over a reload
pub const RELOAD_MESSAGE: &str = "The bouncer is reloading. Please reconnect.";

/// One client session carried across an upgrade
#[derive(Debug, Serialize, Deserialize)]
pub struct FrozenSession {
    pub user: String,
    pub store: FreezeStore,
}

/// Saved state of a [`BouncerServer`] for resumption in a new process image
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BouncerState {
    pub sessions: Vec<FrozenSession>,
    pub motd: Option<String>,
}

/// The bouncer's client-facing server.
pub struct BouncerServer {
    settings: Arc<BouncerSettings>,
    directory: Arc<dyn UserDirectory>,

    listeners: ListenerCollection,
    connection_events: Receiver<ConnectionEvent>,

    dns: DnsClient,
    dns_results: UnboundedReceiver<DnsResult>,

    upstream_events: UnboundedReceiver<UpstreamEvent>,

    sessions: SessionCollection,
}

impl BouncerServer {
    /// Construct a server with no listeners. Lines the upstream side wants
    /// relayed to clients arrive on `upstream_events`.
    pub fn new(
        settings: Arc<BouncerSettings>,
        directory: Arc<dyn UserDirectory>,
        resolver: impl ReverseResolver,
        dns_timeout: Duration,
        upstream_events: UnboundedReceiver<UpstreamEvent>,
    ) -> Self {
        let (connection_send, connection_events) = channel(CONNECTION_EVENT_QUEUE);
        let (dns_send, dns_results) = unbounded_channel();

        Self {
            settings,
            directory,
            listeners: ListenerCollection::new(connection_send),
            connection_events,
            dns: DnsClient::new(resolver, dns_send).with_timeout(dns_timeout),
            dns_results,
            upstream_events,
            sessions: SessionCollection::new(),
        }
    }

    pub fn listeners_mut(&mut self) -> &mut ListenerCollection {
        &mut self.listeners
    }

    pub fn sessions(&self) -> &SessionCollection {
        &self.sessions
    }

    /// Run until shut down, either by a command from an admin or a message
    /// on `shutdown`.
    #[tracing::instrument(skip_all)]
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<ShutdownAction>) -> ShutdownAction {
        loop {
            let actions = select! {
                event = self.connection_events.recv() => match event {
                    Some(event) => self.handle_connection_event(event),
                    None => {
                        tracing::error!("Lost connection event channel");
                        break ShutdownAction::Shutdown;
                    }
                },
                Some(result) = self.dns_results.recv() => self.handle_dns_result(result),
                Some(event) = self.upstream_events.recv() => {
                    self.handle_upstream_event(event);
                    Vec::new()
                },
                action = shutdown.recv() => match action {
                    Ok(action) => break action,
                    Err(e) => {
                        tracing::error!("Got error ({}) from shutdown channel; exiting", e);
                        break ShutdownAction::Shutdown;
                    }
                },
            };

            let shutdown_action = self.apply_actions(actions);
            self.sessions.reap_killed();

            if let Some(action) = shutdown_action {
                break action;
            }
        }
    }

    #[tracing::instrument(skip_all, fields(source = %event.source))]
    fn handle_connection_event(&mut self, event: ConnectionEvent) -> Vec<CommandAction> {
        match event.detail {
            ConnectionEventDetail::NewConnection(conn) => {
                tracing::debug!(addr = %conn.remote_addr, "New connection");

                let mut session = ClientSession::new(conn, Arc::clone(&self.settings));
                session.start_resolution(self.dns.start_lookup(session.id(), session.peer_addr()));
                self.sessions.add(session);
                Vec::new()
            }
            ConnectionEventDetail::Message(line) => {
                tracing::trace!(?line, "Got message");

                let Some(session) = self.sessions.get_mut(event.source) else {
                    return Vec::new();
                };
                if session.enqueue_line(line).is_err() {
                    return Vec::new();
                }
                self.process_session(event.source)
            }
            ConnectionEventDetail::Error(e) => {
                tracing::debug!(error = %e, "Connection closed");
                self.sessions.remove(event.source);
                Vec::new()
            }
        }
    }

    fn handle_dns_result(&mut self, result: DnsResult) -> Vec<CommandAction> {
        let Some(session) = self.sessions.get_mut(result.conn) else {
            return Vec::new();
        };
        if !session.resolution_complete(&result) {
            return Vec::new();
        }
        self.process_session(result.conn)
    }

    fn handle_upstream_event(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Line { user, line } => {
                if let Some(session) = self.sessions.session_for_user_mut(&user) {
                    session.send(&RawLine::new(&line));
                }
            }
            UpstreamEvent::Disconnected { user, reason } => {
                tracing::info!(%user, %reason, "Upstream connection lost");
                if let Some(session) = self.sessions.session_for_user_mut(&user) {
                    session.bnc_notice(&format!("You were disconnected from the IRC server: {}", reason));
                }
            }
        }
    }

    /// Run every line the session has ready through the router
    fn process_session(&mut self, id: ConnectionId) -> Vec<CommandAction> {
        let Some(mut session) = self.sessions.take(id) else {
            return Vec::new();
        };

        let mut ctx = CommandContext::new(self.directory.as_ref(), &self.sessions);
        while let Some(line) = session.next_line() {
            router::process_line(&mut session, &line, &mut ctx);
        }
        let actions = ctx.actions;

        self.sessions.put_back(session);
        actions
    }

    fn apply_actions(&mut self, actions: Vec<CommandAction>) -> Option<ShutdownAction> {
        let mut shutdown = None;

        for action in actions {
            tracing::trace!(?action, "Applying command action");

            match action {
                CommandAction::Attached { conn, user } => {
                    if let Some(owner) = self.sessions.get(conn).and_then(|s| s.owner().cloned()) {
                        self.sessions.attach(conn, &owner);
                    } else {
                        tracing::warn!(%conn, %user, "Attached session has gone away");
                    }
                }
                CommandAction::KillUser { user, reason } => {
                    if let Some(session) = self.sessions.session_for_user_mut(&user) {
                        session.kill(&reason);
                    }
                }
                CommandAction::GlobalNotice(text) => {
                    for session in self.sessions.iter_mut().filter(|s| s.is_attached()) {
                        session.bnc_notice(&text);
                    }
                }
                CommandAction::Shutdown(action) => {
                    shutdown = Some(action);
                }
            }
        }
        shutdown
    }

    /// Freeze every session that can be carried across an upgrade. The rest
    /// are disconnected.
    pub async fn save_state(mut self) -> BouncerState {
        let mut state = BouncerState {
            sessions: Vec::new(),
            motd: self.settings.motd(),
        };

        for mut session in self.sessions.drain() {
            let Some(user) = session.owner().map(|o| o.name().to_string()) else {
                session.kill(RELOAD_MESSAGE);
                continue;
            };

            match session.freeze().await {
                Ok(store) => state.sessions.push(FrozenSession { user, store }),
                Err(FreezeRefused { mut session, reason }) => {
                    tracing::info!(conn = %session.id(), %user, %reason, "Not carrying session over upgrade");
                    session.kill(RELOAD_MESSAGE);
                }
            }
        }

        tracing::info!(sessions = state.sessions.len(), "Saved server state");
        state
    }

    /// Construct a server from a state saved by [`save_state`](Self::save_state)
    /// in a previous process image. The other arguments are as for
    /// [`new`](Self::new).
    pub fn restore_from(
        state: BouncerState,
        settings: Arc<BouncerSettings>,
        directory: Arc<dyn UserDirectory>,
        resolver: impl ReverseResolver,
        dns_timeout: Duration,
        upstream_events: UnboundedReceiver<UpstreamEvent>,
    ) -> Self {
        let mut server = Self::new(settings, directory, resolver, dns_timeout, upstream_events);

        if let Some(motd) = &state.motd {
            server.settings.set_motd(motd);
        }

        for frozen in state.sessions {
            let user = frozen.user.clone();
            if let Err(e) = server.thaw_session(frozen) {
                tracing::error!(%user, "Couldn't restore session: {}", e);
            }
        }
        server
    }

    fn thaw_session(&mut self, frozen: FrozenSession) -> Result<(), ThawError> {
        let Some(owner) = self.directory.lookup(&frozen.user) else {
            if let Some(fd) = frozen.store.read_integer(KEY_FD).and_then(|fd| RawFd::try_from(fd).ok()) {
                // SAFETY: the descriptor was handed over by the previous
                // process image, and nothing in this one has claimed it
                drop(unsafe { std::net::TcpStream::from_raw_fd(fd) });
            }
            return Err(ThawError::UnknownUser(frozen.user));
        };

        let listeners = &self.listeners;
        let session = ClientSession::thaw(&frozen.store, owner, Arc::clone(&self.settings), |fd| {
            // SAFETY: as above
            unsafe { listeners.restore_connection(fd) }
        })?;

        self.sessions.add(session);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::directory::*;
    use crate::freeze::{KEY_NICK, KEY_PEERNAME};
    use crate::test_utils::*;
    use crate::upstream::UpstreamLink;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::net::IpAddr;
    use tokio::sync::mpsc::UnboundedSender;

    struct FixedResolver;

    #[async_trait]
    impl ReverseResolver for FixedResolver {
        async fn reverse_lookup(&self, _addr: IpAddr) -> Option<String> {
            Some("client.example".to_string())
        }
    }

    struct Harness {
        server: BouncerServer,
        upstream: Arc<MockUpstream>,
        upstream_events: UnboundedSender<UpstreamEvent>,
    }

    fn harness() -> Harness {
        let directory = MemoryUserDirectory::new([user_settings("alice", false, &[]), user_settings("root", true, &[])]);
        let upstream = Arc::new(MockUpstream::new("alice"));
        if let Some(alice) = directory.get("alice") {
            alice.set_upstream(Some(Arc::clone(&upstream) as Arc<dyn UpstreamLink>));
        }

        let (upstream_events, upstream_recv) = unbounded_channel();
        let server = BouncerServer::new(
            test_settings(),
            Arc::new(directory),
            FixedResolver,
            Duration::from_secs(3),
            upstream_recv,
        );
        Harness {
            server,
            upstream,
            upstream_events,
        }
    }

    impl Harness {
        /// Accept a connection and wait for its hostname lookup to finish
        async fn connect(&mut self) -> (ConnectionId, TestOutput) {
            let (conn, mut output) = test_connection(ConnectionType::Clear);
            let id = conn.id;
            self.server.handle_connection_event(ConnectionEvent {
                source: id,
                detail: ConnectionEventDetail::NewConnection(conn),
            });

            let result = self.server.dns_results.recv().await.unwrap();
            self.server.handle_dns_result(result);
            output.lines();
            (id, output)
        }

        fn line(&mut self, id: ConnectionId, line: &str) -> Option<ShutdownAction> {
            let actions = self.server.handle_connection_event(ConnectionEvent {
                source: id,
                detail: ConnectionEventDetail::Message(line.to_string()),
            });
            let shutdown = self.server.apply_actions(actions);
            self.server.sessions.reap_killed();
            shutdown
        }

        async fn login(&mut self, user: &str) -> (ConnectionId, TestOutput) {
            let (id, mut output) = self.connect().await;
            for line in [
                "PASS secret".to_string(),
                format!("NICK {}", user),
                format!("USER {} 0 * :x", user),
            ] {
                self.line(id, &line);
            }
            assert!(self.server.sessions.get(id).unwrap().is_attached());
            output.lines();
            self.upstream.written();
            (id, output)
        }
    }

    #[tokio::test]
    async fn lines_wait_for_hostname() {
        let mut h = harness();
        let (conn, mut output) = test_connection(ConnectionType::Clear);
        let id = conn.id;
        h.server.handle_connection_event(ConnectionEvent {
            source: id,
            detail: ConnectionEventDetail::NewConnection(conn),
        });

        for line in ["PASS secret", "NICK alice", "USER alice 0 * :x"] {
            h.line(id, line);
        }
        assert!(!h.server.sessions.get(id).unwrap().is_attached());

        let result = h.server.dns_results.recv().await.unwrap();
        let actions = h.server.handle_dns_result(result);
        h.server.apply_actions(actions);

        let session = h.server.sessions.get(id).unwrap();
        assert!(session.is_attached());
        assert_eq!(session.hostname(), Some("client.example"));
        assert_eq!(h.server.sessions.session_for_user("alice").map(|s| s.id()), Some(id));

        let lines = output.lines();
        assert_eq!(lines[2], ":Notice!notice@bouncer.test NOTICE * :*** Found your hostname (client.example)");
        assert_eq!(lines[3], ":bouncer.test 001 alice :Welcome to the Internet Relay Network alice");
    }

    #[tokio::test]
    async fn new_login_replaces_old() {
        let mut h = harness();
        let (first, mut first_output) = h.login("alice").await;
        let (second, _second_output) = h.login("alice").await;

        assert!(h.server.sessions.get(first).is_none());
        assert_eq!(h.server.sessions.session_for_user("alice").map(|s| s.id()), Some(second));
        assert!(first_output.closed());
    }

    #[tokio::test]
    async fn forwarding_and_relay() {
        let mut h = harness();
        let (id, mut output) = h.login("alice").await;

        h.line(id, "PRIVMSG #rust :hi");
        assert_eq!(h.upstream.written(), vec!["PRIVMSG #rust :hi"]);

        h.upstream_events
            .send(UpstreamEvent::Line {
                user: "alice".to_string(),
                line: ":bob!b@host PRIVMSG #rust :hello".to_string(),
            })
            .unwrap();
        let event = h.server.upstream_events.recv().await.unwrap();
        h.server.handle_upstream_event(event);

        assert_eq!(output.lines(), vec![":bob!b@host PRIVMSG #rust :hello"]);
    }

    #[tokio::test]
    async fn closed_connection_detaches() {
        let mut h = harness();
        let (id, _output) = h.login("alice").await;
        h.line(id, "QUIT :lunch");

        assert!(h.server.sessions.get(id).is_none());
        assert!(h.server.sessions.session_for_user("alice").is_none());
        assert_eq!(h.upstream.written(), vec!["AWAY :lunch"]);
    }

    #[tokio::test]
    async fn admin_actions_reach_other_sessions() {
        let mut h = harness();
        let (_alice, mut alice_output) = h.login("alice").await;
        let (root, mut root_output) = h.login("root").await;

        h.line(root, "BNC global :maintenance at noon");
        assert_eq!(
            alice_output.lines(),
            vec![":-bnc!bouncer@bouncer.test NOTICE alice :maintenance at noon"]
        );
        assert_eq!(
            root_output.lines(),
            vec![":-bnc!bouncer@bouncer.test NOTICE root :maintenance at noon"]
        );

        h.line(root, "BNC kill alice :bye now");
        assert!(h.server.sessions.session_for_user("alice").is_none());
        assert_eq!(
            alice_output.lines(),
            vec![":Notice!notice@bouncer.test NOTICE * :bye now"]
        );

        assert_eq!(h.line(root, "BNC die"), Some(ShutdownAction::Shutdown));
    }

    #[tokio::test]
    async fn upgrade_freezes_what_it_can() {
        let mut h = harness();
        let (_alice, mut alice_output) = h.login("alice").await;
        let (_unauthed, mut unauthed_output) = h.connect().await;
        h.server.settings.set_motd("hello");

        let (state, _) = tokio::join!(h.server.save_state(), alice_output.answer_freeze(11));

        assert_eq!(state.motd.as_deref(), Some("hello"));
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].user, "alice");
        assert_eq!(state.sessions[0].store.read_integer(KEY_FD), Some(11));

        assert_eq!(
            unauthed_output.lines(),
            vec![format!(":Notice!notice@bouncer.test NOTICE * :{}", RELOAD_MESSAGE)]
        );
        assert!(unauthed_output.closed());
    }

    #[tokio::test]
    async fn restore_skips_unknown_users() {
        let mut store = FreezeStore::new();
        store.add_string(KEY_PEERNAME, "host.example");
        store.add_string(KEY_NICK, "ghost");
        let state = BouncerState {
            sessions: vec![FrozenSession {
                user: "nobody".to_string(),
                store,
            }],
            motd: Some("restored".to_string()),
        };

        let settings = test_settings();
        let (_send, recv) = unbounded_channel();
        let server = BouncerServer::restore_from(
            state,
            Arc::clone(&settings),
            Arc::new(MemoryUserDirectory::new([])),
            FixedResolver,
            Duration::from_secs(3),
            recv,
        );

        assert!(server.sessions().is_empty());
        assert_eq!(settings.motd().as_deref(), Some("restored"));
    }
}
