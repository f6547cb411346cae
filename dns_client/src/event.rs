use client_listener::ConnectionId;
use std::net::IpAddr;

/// How a hostname lookup ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// A forward-confirmed name was found
    Found(String),
    /// The resolver answered, but without a usable name
    Failed,
    /// The resolver didn't answer in time
    TimedOut,
}

impl ResolutionOutcome {
    /// The hostname to use for the peer: the name found, or the textual form
    /// of its address otherwise.
    pub fn hostname_or(&self, addr: IpAddr) -> String {
        match self {
            Self::Found(name) => name.clone(),
            Self::Failed | Self::TimedOut => addr.to_string(),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// The result of a DNS lookup
#[derive(Debug, Clone)]
pub struct DnsResult {
    /// The connection ID provided when initiating the request
    pub conn: ConnectionId,
    /// The address that was looked up
    pub addr: IpAddr,
    pub outcome: ResolutionOutcome,
}

impl DnsResult {
    pub fn hostname(&self) -> String {
        self.outcome.hostname_or(self.addr)
    }
}
