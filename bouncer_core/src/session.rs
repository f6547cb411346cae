use crate::auth::{AuthState, Credentials};
use crate::command::CommandHelpRegistry;
use crate::directory::UserIdentity;
use crate::errors::QueueOverflow;
use crate::messages::{message, Hostmask, OutboundMessage};
use crate::movable::Movable;
use crate::settings::*;

use client_listener::{Connection, ConnectionId};
use dns_client::{DnsResult, PendingResolution};

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;

/// Inbound bytes that may be held unprocessed before the client is dropped
pub const RECVQ_LIMIT: usize = 5120;

/// One connected client.
///
/// A session starts out unauthenticated, holding inbound lines until the
/// peer's hostname is known. Once its credentials resolve to a user identity
/// it is attached to that identity, and lines are routed on its behalf.
pub struct ClientSession {
    id: ConnectionId,
    pub(crate) connection: Movable<Connection>,
    peer_addr: IpAddr,
    pub(crate) hostname: Option<String>,
    pending_resolution: Option<PendingResolution>,

    pub(crate) state: AuthState,
    pub(crate) credentials: Credentials,
    pub(crate) last_attempt: Option<Credentials>,
    pub(crate) owner: Option<Arc<dyn UserIdentity>>,

    receive_queue: VecDeque<String>,
    recvq_len: usize,

    pub(crate) command_help: Option<CommandHelpRegistry>,
    killed: bool,
    settings: Arc<BouncerSettings>,
}

impl ClientSession {
    /// Create a session for a newly accepted connection, and greet the client.
    ///
    /// Line processing stays held until [`resolution_complete`](Self::resolution_complete)
    /// supplies a hostname.
    pub fn new(connection: Connection, settings: Arc<BouncerSettings>) -> Self {
        let mut session = Self::build(connection, None, settings);
        session.notice(&format!("*** {} {}", PRODUCT_NAME, PRODUCT_VERSION));
        session.notice("*** Looking up your hostname");
        session
    }

    pub(crate) fn build(
        connection: Connection,
        hostname: Option<String>,
        settings: Arc<BouncerSettings>,
    ) -> Self {
        let credentials = Credentials {
            certificate: connection.certificate_fingerprint().map(str::to_string),
            ..Default::default()
        };

        Self {
            id: connection.id,
            peer_addr: connection.remote_addr,
            connection: Movable::new(connection),
            hostname,
            pending_resolution: None,
            state: AuthState::New,
            credentials,
            last_attempt: None,
            owner: None,
            receive_queue: VecDeque::new(),
            recvq_len: 0,
            command_help: None,
            killed: false,
            settings,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> IpAddr {
        self.peer_addr
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn nick(&self) -> Option<&str> {
        self.credentials.nick.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.credentials.username.as_deref()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn owner(&self) -> Option<&Arc<dyn UserIdentity>> {
        self.owner.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.owner.is_some()
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn settings(&self) -> &BouncerSettings {
        &self.settings
    }

    pub(crate) fn settings_arc(&self) -> Arc<BouncerSettings> {
        Arc::clone(&self.settings)
    }

    pub fn is_tls(&self) -> bool {
        self.connection.as_ref().map_or(false, Connection::is_tls)
    }

    pub fn resolution_pending(&self) -> bool {
        self.pending_resolution.is_some()
    }

    pub fn has_transport(&self) -> bool {
        self.connection.as_ref().map_or(false, Connection::is_open)
    }

    pub fn sendq_len(&self) -> usize {
        self.connection.as_ref().map_or(0, Connection::sendq_len)
    }

    pub fn recvq_len(&self) -> usize {
        self.recvq_len
    }

    /// Nick to address replies to, `*` if none is known yet
    pub fn reply_target(&self) -> &str {
        self.nick().unwrap_or("*")
    }

    fn is_privileged(&self) -> bool {
        self.owner.as_ref().map_or(false, |o| o.is_admin())
    }

    /// Queue a line for the client.
    ///
    /// If this takes a non-admin session's send queue over the configured
    /// limit, the session is killed and `QueueOverflow::SendQ` returned.
    pub fn write_line(&mut self, line: &str) -> Result<(), QueueOverflow> {
        if self.killed {
            return Ok(());
        }
        let Some(connection) = self.connection.as_ref() else {
            return Ok(());
        };

        connection.send(line.to_string());

        if !self.is_privileged() && connection.sendq_len() > self.settings.sendq_limit {
            tracing::info!(conn = %self.id, sendq = connection.sendq_len(), "Send queue limit exceeded");
            self.kill(&QueueOverflow::SendQ.to_string());
            return Err(QueueOverflow::SendQ);
        }
        Ok(())
    }

    /// Send a message, dropping it silently if the session has been killed
    pub fn send(&mut self, msg: &impl OutboundMessage) {
        if let Err(e) = self.write_line(msg.line()) {
            tracing::debug!(conn = %self.id, "Dropped outbound message: {}", e);
        }
    }

    pub(crate) fn notice_source(&self) -> String {
        format!("Notice!notice@{}", self.settings.server_name)
    }

    /// A notice from the bouncer itself, outside of any administrative command
    pub fn notice(&mut self, text: &str) {
        let msg = message::Notice::new(&self.notice_source(), "*", text);
        self.send(&msg);
    }

    /// A reply from the administrative pseudo-user
    pub fn bnc_notice(&mut self, text: &str) {
        let source = Hostmask {
            nick: ADMIN_NICK,
            user: "bouncer",
            host: &self.settings.server_name,
        };
        let msg = message::Notice::new(&source, self.reply_target(), text);
        self.send(&msg);
    }

    /// Send a final notice and close the connection. Further output is
    /// discarded, and any hostname lookup is cancelled.
    pub fn kill(&mut self, reason: &str) {
        if self.killed {
            return;
        }
        self.killed = true;
        self.pending_resolution = None;
        self.receive_queue.clear();
        self.recvq_len = 0;

        tracing::info!(conn = %self.id, user = ?self.owner.as_ref().map(|o| o.name().to_string()), %reason, "Killing client session");

        if let Some(connection) = self.connection.as_ref() {
            let msg = message::Notice::new(&self.notice_source(), "*", reason);
            connection.send(msg.to_string());
            connection.close();
        }
    }

    pub fn start_resolution(&mut self, pending: PendingResolution) {
        self.pending_resolution = Some(pending);
    }

    /// Apply the result of the hostname lookup started for this session,
    /// notify the client, and release held lines. Returns false if the result
    /// wasn't expected.
    pub fn resolution_complete(&mut self, result: &DnsResult) -> bool {
        if result.conn != self.id || self.hostname.is_some() || self.killed {
            return false;
        }
        self.pending_resolution = None;

        let hostname = result.hostname();
        if result.outcome.is_found() {
            self.notice(&format!("*** Found your hostname ({})", hostname));
        } else {
            self.notice(&format!(
                "*** Failed to resolve your host. Using IP address instead ({})",
                hostname
            ));
        }
        tracing::debug!(conn = %self.id, %hostname, outcome = ?result.outcome, "Hostname set");

        self.hostname = Some(hostname);
        true
    }

    /// Accept a line from the client for processing.
    pub fn enqueue_line(&mut self, line: String) -> Result<(), QueueOverflow> {
        if self.killed {
            return Ok(());
        }

        self.recvq_len += line.len();
        self.receive_queue.push_back(line);

        if self.recvq_len > RECVQ_LIMIT {
            self.kill(&QueueOverflow::RecvQ.to_string());
            return Err(QueueOverflow::RecvQ);
        }
        Ok(())
    }

    /// The next line ready to be processed. Lines are held while the
    /// hostname is unknown.
    pub fn next_line(&mut self) -> Option<String> {
        if self.killed || self.hostname.is_none() {
            return None;
        }
        let line = self.receive_queue.pop_front()?;
        self.recvq_len -= line.len();
        Some(line)
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("hostname", &self.hostname)
            .field("state", &self.state)
            .field("nick", &self.credentials.nick)
            .field("owner", &self.owner.as_ref().map(|o| o.name()))
            .field("killed", &self.killed)
            .finish()
    }
}
