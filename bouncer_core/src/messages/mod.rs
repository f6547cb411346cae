//! Outbound protocol messages.
//!
//! Every message type is generated by the `define_messages!` and
//! `define_numerics!` tables in [`message`] and [`numeric`], so the wire
//! format of each reply lives in exactly one place.

use std::fmt::Display;

pub mod message;
pub mod numeric;

/// Something that can appear as the source prefix of a message
pub trait MessageSource {
    fn format(&self) -> String;
}

/// Something that can appear as the target of a message
pub trait MessageTarget {
    fn format(&self) -> String;
}

/// A complete protocol line, including its terminator
pub trait OutboundMessage: Display {
    fn line(&self) -> &str;
}

impl MessageSource for str {
    fn format(&self) -> String {
        self.to_string()
    }
}

impl MessageSource for String {
    fn format(&self) -> String {
        self.clone()
    }
}

impl MessageTarget for str {
    fn format(&self) -> String {
        self.to_string()
    }
}

impl MessageTarget for String {
    fn format(&self) -> String {
        self.clone()
    }
}

/// A full `nick!user@host` source
pub struct Hostmask<'a> {
    pub nick: &'a str,
    pub user: &'a str,
    pub host: &'a str,
}

impl MessageSource for Hostmask<'_> {
    fn format(&self) -> String {
        format!("{}!{}@{}", self.nick, self.user, self.host)
    }
}

/// A line received from elsewhere and relayed unchanged
#[derive(Debug, Clone)]
pub struct RawLine(String);

impl RawLine {
    pub fn new(line: &str) -> Self {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        Self(format!("{}\r\n", line))
    }
}

impl Display for RawLine {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl OutboundMessage for RawLine {
    fn line(&self) -> &str {
        &self.0
    }
}
