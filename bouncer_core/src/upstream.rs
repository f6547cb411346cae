//! The boundary between client sessions and the upstream IRC connection.
//!
//! Sessions never talk to the network directly: lines are forwarded through
//! an [`UpstreamLink`], and cached channel state is read back from it as
//! owned [`ChannelCache`] snapshots. Each part of a snapshot is an `Option`;
//! `None` means the upstream side doesn't currently hold a valid copy of that
//! data, and the query must be forwarded instead of answered locally.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelModes {
    /// Mode string including parameters, e.g. `+ntk key`
    pub modes: String,
    /// Channel creation time
    pub created: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub text: String,
    pub setter: String,
    pub set_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMember {
    pub nick: String,
    /// Every prefix character the member holds, in any order
    pub prefixes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanEntry {
    pub mask: String,
    pub setter: String,
    pub set_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoEntry {
    pub user: String,
    pub host: String,
    pub server: String,
    pub nick: String,
    pub flags: String,
    pub hops: u32,
    pub realname: String,
}

/// Cached state of one channel the upstream connection is in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCache {
    pub name: String,
    pub modes: Option<ChannelModes>,
    pub topic: Option<Topic>,
    pub members: Option<Vec<ChannelMember>>,
    pub bans: Option<Vec<BanEntry>>,
    pub who: Option<Vec<WhoEntry>>,
}

impl ChannelCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// The upstream IRC connection belonging to one user identity.
pub trait UpstreamLink: Send + Sync {
    /// Queue a line to be sent to the IRC server. Fire and forget.
    fn write_line(&self, line: &str);

    /// The server's name, as used in the source of its numerics
    fn server_name(&self) -> String;

    /// Our nickname on the upstream network
    fn current_nick(&self) -> String;

    /// Snapshot of a channel's cached state, if we're in it
    fn channel(&self, name: &str) -> Option<ChannelCache>;

    /// Names of every channel we're currently in
    fn channels(&self) -> Vec<String>;

    /// Server version string from the 351 reply, if known
    fn server_version(&self) -> Option<String>;

    /// Server comments from the 351 reply, if known
    fn server_features(&self) -> Option<String>;

    /// ISUPPORT tokens in the order the server sent them
    fn isupport(&self) -> Vec<(String, Option<String>)>;

    /// Drop the connection to the server
    fn disconnect(&self, reason: &str);

    fn isupport_value(&self, name: &str) -> Option<String> {
        self.isupport()
            .into_iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value)
    }
}

/// Something the upstream side needs relayed to a user's client
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// A line from the IRC server, to pass on verbatim
    Line { user: String, line: String },
    /// The upstream connection went away
    Disconnected { user: String, reason: String },
}
