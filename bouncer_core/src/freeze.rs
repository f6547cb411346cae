//! Handing live client sessions across a restart of the process.
//!
//! Freezing a session detaches its socket from the runtime, leaving the
//! descriptor open across `exec`, and records what's needed to rebuild the
//! session around it in a [`FreezeStore`]. Thawing reverses the process
//! without re-running hostname lookup or authentication.

use crate::auth::AuthState;
use crate::directory::UserIdentity;
use crate::errors::{FreezeError, ThawError};
use crate::session::ClientSession;
use crate::settings::BouncerSettings;

use client_listener::{Connection, ConnectionError};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;

pub const KEY_PEERNAME: &str = "client.peername";
pub const KEY_NICK: &str = "client.nick";
pub const KEY_FD: &str = "client.fd";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrozenValue {
    Integer(i64),
    String(String),
}

/// A string-keyed bag of saved values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeStore(BTreeMap<String, FrozenValue>);

impl FreezeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_string(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), FrozenValue::String(value.to_string()));
    }

    pub fn add_integer(&mut self, key: &str, value: i64) {
        self.0.insert(key.to_string(), FrozenValue::Integer(value));
    }

    pub fn read_string(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            FrozenValue::String(s) => Some(s),
            FrozenValue::Integer(_) => None,
        }
    }

    pub fn read_integer(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            FrozenValue::Integer(i) => Some(*i),
            FrozenValue::String(_) => None,
        }
    }
}

/// A session that couldn't be frozen, returned to the caller with the reason
#[derive(Debug)]
pub struct FreezeRefused {
    pub session: ClientSession,
    pub reason: FreezeError,
}

impl ClientSession {
    /// Check whether this session could be frozen right now
    pub fn freeze_eligibility(&self) -> Result<(), FreezeError> {
        if self.resolution_pending() {
            Err(FreezeError::ResolutionPending)
        } else if self.hostname().is_none() {
            Err(FreezeError::NoHostname)
        } else if !self.has_transport() {
            Err(FreezeError::InvalidTransport)
        } else if self.is_tls() {
            Err(FreezeError::TlsTransport)
        } else if !self.is_attached() {
            Err(FreezeError::NotAttached)
        } else {
            Ok(())
        }
    }

    /// Detach this session's socket and record how to rebuild it.
    ///
    /// If the session isn't eligible it's handed back untouched. If the
    /// connection task fails to give up the socket, the session is handed
    /// back without a transport.
    pub async fn freeze(mut self) -> Result<FreezeStore, FreezeRefused> {
        if let Err(reason) = self.freeze_eligibility() {
            return Err(FreezeRefused { session: self, reason });
        }

        let hostname = self.hostname().unwrap_or_default().to_string();
        let Some(connection) = self.connection.take() else {
            return Err(FreezeRefused {
                session: self,
                reason: FreezeError::InvalidTransport,
            });
        };
        let nick = self.reply_target().to_string();

        match connection.freeze().await {
            Ok(fd) => {
                let mut store = FreezeStore::new();
                store.add_string(KEY_PEERNAME, &hostname);
                store.add_string(KEY_NICK, &nick);
                store.add_integer(KEY_FD, fd.into());

                tracing::info!(conn = %self.id(), %nick, fd, "Froze client session");
                Ok(store)
            }
            Err(e) => Err(FreezeRefused {
                session: self,
                reason: e.into(),
            }),
        }
    }

    /// Rebuild a frozen session for `owner`.
    ///
    /// `restore` turns the saved descriptor back into a live connection;
    /// normally this is [`ListenerCollection::restore_connection`](client_listener::ListenerCollection::restore_connection).
    pub fn thaw(
        store: &FreezeStore,
        owner: Arc<dyn UserIdentity>,
        settings: Arc<BouncerSettings>,
        restore: impl FnOnce(RawFd) -> Result<Connection, ConnectionError>,
    ) -> Result<Self, ThawError> {
        let hostname = store
            .read_string(KEY_PEERNAME)
            .ok_or(ThawError::MissingField(KEY_PEERNAME))?;
        let nick = store
            .read_string(KEY_NICK)
            .ok_or(ThawError::MissingField(KEY_NICK))?;
        let fd = store
            .read_integer(KEY_FD)
            .ok_or(ThawError::MissingField(KEY_FD))?;
        let fd = RawFd::try_from(fd).map_err(|_| ThawError::InvalidDescriptor(fd))?;

        let connection = restore(fd)?;
        let mut session = Self::build(connection, Some(hostname.to_string()), settings);

        session.credentials.nick = Some(nick.to_string());
        session.credentials.username = Some(owner.name().to_string());
        session.last_attempt = Some(session.credentials.clone());
        session.state = AuthState::Attached;
        owner.client_attached();
        session.owner = Some(owner);

        tracing::info!(conn = %session.id(), %nick, %hostname, "Thawed client session");
        Ok(session)
    }
}
