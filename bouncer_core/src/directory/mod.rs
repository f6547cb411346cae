//! User identities, and the directory that holds them.

use crate::upstream::UpstreamLink;

use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

mod memory;
pub use memory::*;

/// Maximum number of host-allow entries one identity may have
pub const MAX_HOST_ALLOWS: usize = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostListError {
    #[error("host-allow list is full")]
    Full,
    #[error("{0} is already in the host-allow list")]
    Duplicate(String),
}

/// A bouncer user, as seen by client sessions.
///
/// Credential checks are read-only. The mutators cover the small amount of
/// per-user state a client session updates: preferred nick, away text,
/// channel keys, and the host-allow list.
pub trait UserIdentity: Send + Sync {
    fn name(&self) -> &str;

    fn is_admin(&self) -> bool;
    fn is_suspended(&self) -> bool;
    fn set_suspended(&self, suspended: bool);

    fn validate_password(&self, password: &str) -> bool;
    fn matches_certificate(&self, fingerprint: &str) -> bool;
    fn is_ip_blocked(&self, addr: IpAddr) -> bool;
    fn can_host_connect(&self, hostname: &str) -> bool;
    fn log_bad_login(&self, addr: IpAddr);

    /// Called when a client session attaches to, or detaches from, this user
    fn client_attached(&self);
    fn client_detached(&self);
    /// Time of the last client attach or detach
    fn last_seen(&self) -> i64;

    fn upstream(&self) -> Option<Arc<dyn UpstreamLink>>;

    fn nick(&self) -> Option<String>;
    fn set_nick(&self, nick: &str);
    fn realname(&self) -> Option<String>;

    fn away_text(&self) -> Option<String>;
    fn set_away_text(&self, text: &str);

    fn channel_key(&self, channel: &str) -> Option<String>;
    fn set_channel_key(&self, channel: &str, key: &str);

    fn host_allows(&self) -> Vec<String>;
    fn add_host_allow(&self, mask: &str) -> Result<(), HostListError>;
    fn remove_host_allow(&self, mask: &str) -> bool;
}

/// The set of known users
pub trait UserDirectory: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Arc<dyn UserIdentity>>;
    fn users(&self) -> Vec<Arc<dyn UserIdentity>>;
}
