use crate::command::CommandContext;
use crate::directory::*;
use crate::router;
use crate::session::ClientSession;
use crate::session_collection::SessionCollection;
use crate::settings::BouncerSettings;
use crate::upstream::*;

pub use client_listener::ConnectionType;
use client_listener::*;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

pub const ALICE_CERT: &str = "a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1";
pub const SHARED_CERT: &str = "5c5c5c5c5c5c5c5c5c5c5c5c5c5c5c5c5c5c5c5c";

static NEXT_CONNECTION: AtomicI64 = AtomicI64::new(1);

pub fn test_settings() -> Arc<BouncerSettings> {
    Arc::new(BouncerSettings::new("bouncer.test", 10 * 1024, true))
}

/// The far end of a test connection's control channel
pub struct TestOutput {
    recv: UnboundedReceiver<ConnectionControl>,
    pending: Vec<String>,
    closed: bool,
}

impl TestOutput {
    fn pump(&mut self) {
        while let Ok(control) = self.recv.try_recv() {
            match control {
                ConnectionControl::Send(line) => self.pending.push(line.trim_end_matches("\r\n").to_string()),
                ConnectionControl::Close => self.closed = true,
                ConnectionControl::Freeze(_) => {}
            }
        }
    }

    /// Lines sent since the last call, without terminators
    pub fn lines(&mut self) -> Vec<String> {
        self.pump();
        std::mem::take(&mut self.pending)
    }

    pub fn closed(&mut self) -> bool {
        self.pump();
        self.closed
    }

    /// Wait for a freeze request and hand back `fd` as the detached socket
    pub async fn answer_freeze(&mut self, fd: RawFd) {
        while let Some(control) = self.recv.recv().await {
            match control {
                ConnectionControl::Send(line) => self.pending.push(line.trim_end_matches("\r\n").to_string()),
                ConnectionControl::Close => self.closed = true,
                ConnectionControl::Freeze(reply) => {
                    let _ = reply.send(Ok(fd));
                    return;
                }
            }
        }
    }
}

pub fn test_connection_with(
    conn_type: ConnectionType,
    tls_info: Option<TlsInfo>,
) -> (Connection, TestOutput) {
    let (send, recv) = unbounded_channel();
    let id = ConnectionId::new(ListenerId::new(1), NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed));
    let conn = Connection::new(id, conn_type, "192.0.2.1".parse().unwrap(), tls_info, send);

    (
        conn,
        TestOutput {
            recv,
            pending: Vec::new(),
            closed: false,
        },
    )
}

pub fn test_connection(conn_type: ConnectionType) -> (Connection, TestOutput) {
    let tls_info = match conn_type {
        ConnectionType::Clear => None,
        ConnectionType::Tls => Some(TlsInfo { fingerprint: None }),
    };
    test_connection_with(conn_type, tls_info)
}

pub fn user_settings(name: &str, admin: bool, certificates: &[&str]) -> UserSettings {
    UserSettings {
        name: name.to_string(),
        password: pwhash::sha512_crypt::hash("secret").unwrap(),
        admin,
        suspended: false,
        nick: None,
        realname: Some(format!("{} the tester", name)),
        upstream: None,
        host_allows: vec!["*".to_string()],
        certificates: certificates.iter().map(|c| c.to_string()).collect(),
    }
}

/// Make a session look as if it had authenticated as a fresh test user
pub fn attach_test_owner(session: &mut ClientSession, admin: bool) -> Arc<MemoryUser> {
    let user = Arc::new(MemoryUser::new(UserSettings {
        password: "*".to_string(),
        ..user_settings("tester", admin, &[])
    }));

    session.credentials.nick = Some("tester".to_string());
    session.credentials.username = Some("tester".to_string());
    session.state = crate::auth::AuthState::Attached;
    session.owner = Some(Arc::clone(&user) as Arc<dyn UserIdentity>);
    user
}

/// An upstream link that records what it's asked to send, and serves
/// whatever cache contents the test gives it.
pub struct MockUpstream {
    nick: String,
    written: Mutex<Vec<String>>,
    channels: Mutex<Vec<ChannelCache>>,
    version: Mutex<Option<(String, String)>>,
    isupport: Mutex<Vec<(String, Option<String>)>>,
    disconnected: Mutex<Option<String>>,
}

impl MockUpstream {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            written: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            version: Mutex::new(None),
            isupport: Mutex::new(Vec::new()),
            disconnected: Mutex::new(None),
        }
    }

    /// Lines written since the last call
    pub fn written(&self) -> Vec<String> {
        std::mem::take(&mut *self.written.lock())
    }

    pub fn set_channel(&self, cache: ChannelCache) {
        let mut channels = self.channels.lock();
        channels.retain(|c| !c.name.eq_ignore_ascii_case(&cache.name));
        channels.push(cache);
    }

    pub fn set_version(&self, version: &str, features: &str) {
        *self.version.lock() = Some((version.to_string(), features.to_string()));
    }

    pub fn set_isupport(&self, tokens: &[&str]) {
        *self.isupport.lock() = tokens
            .iter()
            .map(|t| match t.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (t.to_string(), None),
            })
            .collect();
    }

    pub fn disconnect_reason(&self) -> Option<String> {
        self.disconnected.lock().clone()
    }
}

impl UpstreamLink for MockUpstream {
    fn write_line(&self, line: &str) {
        self.written.lock().push(line.to_string());
    }

    fn server_name(&self) -> String {
        "irc.test".to_string()
    }

    fn current_nick(&self) -> String {
        self.nick.clone()
    }

    fn channel(&self, name: &str) -> Option<ChannelCache> {
        self.channels
            .lock()
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn channels(&self) -> Vec<String> {
        self.channels.lock().iter().map(|c| c.name.clone()).collect()
    }

    fn server_version(&self) -> Option<String> {
        self.version.lock().as_ref().map(|v| v.0.clone())
    }

    fn server_features(&self) -> Option<String> {
        self.version.lock().as_ref().map(|v| v.1.clone())
    }

    fn isupport(&self) -> Vec<(String, Option<String>)> {
        self.isupport.lock().clone()
    }

    fn disconnect(&self, reason: &str) {
        *self.disconnected.lock() = Some(reason.to_string());
    }
}

/// A user directory with a few known users, each with a mock upstream, and
/// an empty session collection.
///
/// `alice` and `root` (an admin) authenticate with password `secret`;
/// `alice` also by [`ALICE_CERT`]. `carol` and `dave` share [`SHARED_CERT`].
pub struct TestEnv {
    pub directory: MemoryUserDirectory,
    pub sessions: SessionCollection,
    pub settings: Arc<BouncerSettings>,
    upstreams: HashMap<String, Arc<MockUpstream>>,
}

impl TestEnv {
    pub fn new() -> Self {
        let directory = MemoryUserDirectory::new([
            user_settings("alice", false, &[ALICE_CERT]),
            user_settings("carol", false, &[SHARED_CERT]),
            user_settings("dave", false, &[SHARED_CERT]),
            user_settings("root", true, &[]),
        ]);

        let mut upstreams = HashMap::new();
        for name in ["alice", "carol", "dave", "root"] {
            let upstream = Arc::new(MockUpstream::new(name));
            if let Some(user) = directory.get(name) {
                user.set_upstream(Some(Arc::clone(&upstream) as Arc<dyn UpstreamLink>));
            }
            upstreams.insert(name.to_string(), upstream);
        }

        Self {
            directory,
            sessions: SessionCollection::new(),
            settings: test_settings(),
            upstreams,
        }
    }

    pub fn context(&self) -> CommandContext<'_> {
        CommandContext::new(&self.directory, &self.sessions)
    }

    pub fn upstream(&self, user: &str) -> Arc<MockUpstream> {
        Arc::clone(&self.upstreams[user])
    }

    /// A new session whose hostname lookup has already finished
    pub fn resolved_session(&self, conn_type: ConnectionType) -> (ClientSession, TestOutput) {
        let (conn, output) = test_connection(conn_type);
        let session = ClientSession::build(conn, Some("client.example".to_string()), Arc::clone(&self.settings));
        (session, output)
    }

    pub fn resolved_tls_session(&self, fingerprint: Option<&str>) -> (ClientSession, TestOutput) {
        let (conn, output) = test_connection_with(
            ConnectionType::Tls,
            Some(TlsInfo {
                fingerprint: fingerprint.map(str::to_string),
            }),
        );
        let session = ClientSession::build(conn, Some("client.example".to_string()), Arc::clone(&self.settings));
        (session, output)
    }

    /// A session that has logged in as `user` with nick `nick`. Output from
    /// the login is discarded.
    pub fn attached_session(&self, user: &str, nick: &str) -> (ClientSession, TestOutput) {
        let (mut session, mut output) = self.resolved_session(ConnectionType::Clear);

        let mut ctx = self.context();
        for line in [
            "PASS secret".to_string(),
            format!("NICK {}", nick),
            format!("USER {} 0 * :Test", user),
        ] {
            router::process_line(&mut session, &line, &mut ctx);
        }
        assert!(session.is_attached(), "test session failed to attach");

        output.lines();
        self.upstream(user).written();
        (session, output)
    }
}
