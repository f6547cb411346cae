use crate::directory::UserIdentity;
use crate::session::ClientSession;

use client_listener::ConnectionId;

use std::collections::HashMap;
use std::sync::Arc;

/// Message given to a client displaced by a newer login for the same user
pub const EVICTION_MESSAGE: &str = "Another client logged in. Your client has been disconnected because only one client can be logged in at a time.";

/// Stores the client sessions handled by a server, and allows lookup by
/// either connection ID or owning user name.
///
/// At most one attached session exists per user; attaching a new one evicts
/// the old.
#[derive(Debug, Default)]
pub struct SessionCollection {
    sessions: HashMap<ConnectionId, ClientSession>,
    by_user: HashMap<String, ConnectionId>,
}

fn user_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl SessionCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session. If it's already attached, it's also registered
    /// against its owner, evicting any other session for that user.
    pub fn add(&mut self, session: ClientSession) {
        let id = session.id();
        let owner = session.owner().cloned();
        self.sessions.insert(id, session);

        if let Some(owner) = owner {
            self.attach(id, &owner);
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ClientSession> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ClientSession> {
        self.sessions.get_mut(&id)
    }

    /// Temporarily remove a session for processing. Its user registration is
    /// left in place; return it with [`put_back`](Self::put_back).
    pub fn take(&mut self, id: ConnectionId) -> Option<ClientSession> {
        self.sessions.remove(&id)
    }

    pub fn put_back(&mut self, session: ClientSession) {
        self.sessions.insert(session.id(), session);
    }

    /// Remove a session for good.
    ///
    /// If it was attached, its owner is told the client has gone, and the
    /// owner's away text (if any) is set upstream.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ClientSession> {
        let session = self.sessions.remove(&id)?;
        tracing::trace!(conn = %id, "Removing session");

        if let Some(owner) = session.owner() {
            let key = user_key(owner.name());
            if self.by_user.get(&key) == Some(&id) {
                self.by_user.remove(&key);
            }

            owner.client_detached();
            if let (Some(text), Some(upstream)) = (owner.away_text(), owner.upstream()) {
                upstream.write_line(&format!("AWAY :{}", text));
            }
        }
        Some(session)
    }

    /// Register connection `id` as `user`'s attached session.
    ///
    /// Any other session already attached for that user is killed and
    /// dropped. It's detached from the user first, so the user sees no
    /// disconnect.
    pub fn attach(&mut self, id: ConnectionId, user: &Arc<dyn UserIdentity>) {
        let key = user_key(user.name());

        if let Some(previous) = self.by_user.insert(key, id) {
            if previous != id {
                if let Some(mut old) = self.sessions.remove(&previous) {
                    tracing::info!(user = %user.name(), old = %previous, new = %id, "Evicting previous session");
                    old.owner = None;
                    old.kill(EVICTION_MESSAGE);
                }
            }
        }
    }

    /// The session attached for the given user, if any
    pub fn session_for_user(&self, name: &str) -> Option<&ClientSession> {
        let id = self.by_user.get(&user_key(name))?;
        self.sessions.get(id)
    }

    pub fn session_for_user_mut(&mut self, name: &str) -> Option<&mut ClientSession> {
        let id = self.by_user.get(&user_key(name))?;
        self.sessions.get_mut(id)
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientSession> {
        self.sessions.values_mut()
    }

    /// Remove every session that has been killed
    pub fn reap_killed(&mut self) -> usize {
        let killed: Vec<_> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_killed())
            .map(|(id, _)| *id)
            .collect();

        for id in &killed {
            self.remove(*id);
        }
        killed.len()
    }

    /// Take every session out of the collection without running detach
    /// hooks, for handing over to a new process.
    pub fn drain(&mut self) -> Vec<ClientSession> {
        self.by_user.clear();
        self.sessions.drain().map(|(_, s)| s).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookup_by_user() {
        let env = TestEnv::new();
        let mut sessions = SessionCollection::new();

        let (session, _output) = env.attached_session("alice", "alice");
        let id = session.id();
        sessions.add(session);

        assert_eq!(sessions.session_for_user("ALICE").map(|s| s.id()), Some(id));
        assert!(sessions.session_for_user("carol").is_none());

        let taken = sessions.take(id).unwrap();
        assert!(sessions.session_for_user("alice").is_none());
        sessions.put_back(taken);
        assert!(sessions.session_for_user("alice").is_some());
    }

    #[test]
    fn second_login_evicts_first() {
        let env = TestEnv::new();
        let mut sessions = SessionCollection::new();
        let alice = env.directory.get("alice").unwrap();
        alice.set_away_text("away");

        let (first, mut first_output) = env.attached_session("alice", "alice");
        let first_id = first.id();
        sessions.add(first);

        let (second, _second_output) = env.attached_session("alice", "alice");
        let second_id = second.id();
        sessions.add(second);

        assert!(sessions.get(first_id).is_none());
        assert_eq!(sessions.session_for_user("alice").map(|s| s.id()), Some(second_id));
        assert_eq!(
            first_output.lines(),
            vec![format!(":Notice!notice@bouncer.test NOTICE * :{}", EVICTION_MESSAGE)]
        );
        assert!(first_output.closed());
        // The user never went away, so the away text isn't set upstream
        assert!(env.upstream("alice").written().is_empty());
    }

    #[test]
    fn removal_runs_detach_hooks() {
        let env = TestEnv::new();
        let mut sessions = SessionCollection::new();
        env.directory.get("alice").unwrap().set_away_text("gone fishing");

        let (session, _output) = env.attached_session("alice", "alice");
        let id = session.id();
        sessions.add(session);

        sessions.get_mut(id).unwrap().kill("bye");
        assert_eq!(sessions.reap_killed(), 1);

        assert!(sessions.is_empty());
        assert!(sessions.session_for_user("alice").is_none());
        assert_eq!(env.upstream("alice").written(), vec!["AWAY :gone fishing"]);
    }

    #[test]
    fn unattached_sessions_have_no_owner_hooks() {
        let env = TestEnv::new();
        let mut sessions = SessionCollection::new();

        let (session, _output) = env.resolved_session(ConnectionType::Clear);
        let id = session.id();
        sessions.add(session);

        assert!(sessions.remove(id).is_some());
        assert!(sessions.remove(id).is_none());
        assert!(env.upstream("alice").written().is_empty());
    }
}
