use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Identifies a listening socket. Listener zero is reserved for connections
/// restored from a previous process image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(i64);

/// Identifies a single client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(ListenerId, i64);

impl ListenerId {
    pub const RESTORED: ListenerId = ListenerId(0);

    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn local(&self) -> i64 {
        self.0
    }
}

impl ConnectionId {
    pub fn new(listener: ListenerId, id: i64) -> Self {
        Self(listener, id)
    }

    pub fn listener(&self) -> ListenerId {
        self.0
    }

    pub fn local(&self) -> i64 {
        self.1
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.0 .0, self.1)
    }
}

/// Sequential generator for [`ListenerId`]s.
#[derive(Debug)]
pub struct ListenerIdGenerator(AtomicI64);

impl ListenerIdGenerator {
    pub fn new(start: i64) -> Self {
        Self(AtomicI64::new(start))
    }

    pub fn next(&self) -> ListenerId {
        ListenerId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Sequential generator for the [`ConnectionId`]s belonging to one listener.
#[derive(Debug)]
pub struct ConnectionIdGenerator(ListenerId, AtomicI64);

impl ConnectionIdGenerator {
    pub fn new(listener: ListenerId, start: i64) -> Self {
        Self(listener, AtomicI64::new(start))
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.0, self.1.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_ids_are_sequential() {
        let gen = ConnectionIdGenerator::new(ListenerId::new(3), 1);
        let a = gen.next();
        let b = gen.next();

        assert_eq!(a.listener(), ListenerId::new(3));
        assert_eq!(a.local(), 1);
        assert_eq!(b.local(), 2);
        assert_eq!(b.to_string(), "3:2");
    }
}
