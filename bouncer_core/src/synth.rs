//! Answering channel and server queries from the upstream cache.
//!
//! A query that the cache can answer is replied to locally with the same
//! numerics the IRC server would have sent. Anything else is sent upstream,
//! and the server's reply reaches the client (and the cache) in the usual way.

use crate::messages::numeric;
use crate::session::ClientSession;
use crate::upstream::{ChannelMember, UpstreamLink};
use crate::utils::{is_channel_name, now, LineWrapper};

use itertools::Itertools;
use std::sync::Arc;

/// Maximum length of the member list in one names reply, in bytes
pub const NAMES_LINE_LENGTH: usize = 400;
/// ISUPPORT tokens per 005 line
pub const ISUPPORT_TOKENS_PER_LINE: usize = 11;
/// A cached WHO reply is only replayed if the owner was seen this recently
pub const WHO_FRESHNESS_SECS: i64 = 300;
/// Channel prefixes, highest first, used if the server didn't send `PREFIX`
pub const DEFAULT_PREFIXES: &str = "@+";

/// A query that may be answered from cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthQuery {
    Modes(String),
    Bans(String),
    Topic(String),
    Names(String),
    Who(String),
    Version,
}

impl SynthQuery {
    /// Recognise a cacheable query from a command and its arguments. Forms
    /// with extra arguments (setting a topic, changing modes) aren't queries,
    /// and nor is anything aimed at a nickname.
    pub fn parse(command: &str, args: &[String]) -> Option<Self> {
        let target = || args[0].clone();
        if args.first().map_or(false, |t| !is_channel_name(t)) {
            return None;
        }

        match (command.to_ascii_uppercase().as_str(), args.len()) {
            ("MODE", 1) => Some(Self::Modes(target())),
            ("MODE", 2) if args[1] == "+b" || args[1] == "b" => Some(Self::Bans(target())),
            ("TOPIC", 1) => Some(Self::Topic(target())),
            ("NAMES", 1) => Some(Self::Names(target())),
            ("WHO", 1) => Some(Self::Who(target())),
            ("VERSION", 0) => Some(Self::Version),
            _ => None,
        }
    }

    /// The request to send upstream if the cache can't answer
    pub fn upstream_request(&self) -> String {
        match self {
            Self::Modes(chan) => format!("MODE {}", chan),
            Self::Bans(chan) => format!("MODE {} +b", chan),
            Self::Topic(chan) => format!("TOPIC {}", chan),
            Self::Names(chan) => format!("NAMES {}", chan),
            Self::Who(chan) => format!("WHO {}", chan),
            Self::Version => "VERSION".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthOutcome {
    /// Replied to from cache
    Answered,
    /// Sent to the upstream server
    Forwarded,
    /// The session has no upstream connection to ask
    Unavailable,
}

/// Channel prefix characters in rank order, from the server's `PREFIX` token
pub fn prefix_ranking(upstream: &dyn UpstreamLink) -> String {
    upstream
        .isupport_value("PREFIX")
        .and_then(|value| value.split_once(')').map(|(_, prefixes)| prefixes.to_string()))
        .filter(|prefixes| !prefixes.is_empty())
        .unwrap_or_else(|| DEFAULT_PREFIXES.to_string())
}

/// The highest-ranked of `prefixes`, if any of them are known
pub fn highest_prefix(prefixes: &str, ranking: &str) -> Option<char> {
    ranking.chars().find(|c| prefixes.contains(*c))
}

/// Member lists for names replies. An empty channel still produces one
/// (empty) line.
pub fn names_lines(members: &[ChannelMember], ranking: &str) -> Vec<String> {
    let tokens = members.iter().map(|member| {
        let mut token = String::with_capacity(member.nick.len() + 1);
        token.extend(highest_prefix(&member.prefixes, ranking));
        token.push_str(&member.nick);
        token
    });

    let lines: Vec<_> = LineWrapper::<' ', _, _>::new(NAMES_LINE_LENGTH, tokens).collect();
    if lines.is_empty() {
        vec![String::new()]
    } else {
        lines
    }
}

/// ISUPPORT tokens re-joined into 005 payloads
pub fn isupport_lines(tokens: &[(String, Option<String>)]) -> Vec<String> {
    tokens
        .iter()
        .map(|(name, value)| match value.as_deref() {
            Some(value) if !value.is_empty() => format!("{}={}", name, value),
            _ => name.clone(),
        })
        .chunks(ISUPPORT_TOKENS_PER_LINE)
        .into_iter()
        .map(|mut chunk| chunk.join(" "))
        .collect()
}

/// Try to answer `query` from the session owner's upstream cache, sending it
/// upstream instead if the cache doesn't hold what's needed.
pub fn synthesize(session: &mut ClientSession, query: &SynthQuery) -> SynthOutcome {
    let Some(owner) = session.owner().cloned() else {
        return SynthOutcome::Unavailable;
    };
    let Some(upstream) = owner.upstream() else {
        return SynthOutcome::Unavailable;
    };

    let answered = match query {
        SynthQuery::Modes(chan) => send_modes(session, &upstream, chan),
        SynthQuery::Bans(chan) => send_bans(session, &upstream, chan),
        SynthQuery::Topic(chan) => send_topic(session, &upstream, chan),
        SynthQuery::Names(chan) => send_names(session, &upstream, chan),
        SynthQuery::Who(chan) => {
            now() - owner.last_seen() < WHO_FRESHNESS_SECS && send_who(session, &upstream, chan)
        }
        SynthQuery::Version => send_version(session, &upstream),
    };

    if answered {
        SynthOutcome::Answered
    } else {
        tracing::trace!(conn = %session.id(), ?query, "Cache miss, forwarding");
        upstream.write_line(&query.upstream_request());
        SynthOutcome::Forwarded
    }
}

fn send_modes(session: &mut ClientSession, upstream: &Arc<dyn UpstreamLink>, chan: &str) -> bool {
    let Some(modes) = upstream.channel(chan).and_then(|c| c.modes) else {
        return false;
    };
    let (server, nick) = (upstream.server_name(), upstream.current_nick());

    session.send(&numeric::ChannelModeIs::new(&server, &nick, chan, &modes.modes));
    session.send(&numeric::ChannelCreationTime::new(&server, &nick, chan, modes.created));
    true
}

fn send_bans(session: &mut ClientSession, upstream: &Arc<dyn UpstreamLink>, chan: &str) -> bool {
    let Some(bans) = upstream.channel(chan).and_then(|c| c.bans) else {
        return false;
    };
    let (server, nick) = (upstream.server_name(), upstream.current_nick());

    for ban in &bans {
        session.send(&numeric::BanList::new(&server, &nick, chan, &ban.mask, &ban.setter, ban.set_at));
    }
    session.send(&numeric::EndOfBanList::new(&server, &nick, chan));
    true
}

fn send_topic(session: &mut ClientSession, upstream: &Arc<dyn UpstreamLink>, chan: &str) -> bool {
    // A cached empty topic can't be told apart from one that was never fetched
    let Some(topic) = upstream
        .channel(chan)
        .and_then(|c| c.topic)
        .filter(|t| !t.text.is_empty())
    else {
        return false;
    };
    let (server, nick) = (upstream.server_name(), upstream.current_nick());

    session.send(&numeric::TopicIs::new(&server, &nick, chan, &topic.text));
    session.send(&numeric::TopicSetBy::new(&server, &nick, chan, &topic.setter, topic.set_at));
    true
}

fn send_names(session: &mut ClientSession, upstream: &Arc<dyn UpstreamLink>, chan: &str) -> bool {
    let Some(members) = upstream.channel(chan).and_then(|c| c.members) else {
        return false;
    };
    let (server, nick) = (upstream.server_name(), upstream.current_nick());
    let ranking = prefix_ranking(upstream.as_ref());

    for line in names_lines(&members, &ranking) {
        session.send(&numeric::NamesReply::new(&server, &nick, chan, &line));
    }
    session.send(&numeric::EndOfNames::new(&server, &nick, chan));
    true
}

fn send_who(session: &mut ClientSession, upstream: &Arc<dyn UpstreamLink>, chan: &str) -> bool {
    let Some(entries) = upstream.channel(chan).and_then(|c| c.who) else {
        return false;
    };
    let (server, nick) = (upstream.server_name(), upstream.current_nick());

    for e in &entries {
        session.send(&numeric::WhoReply::new(
            &server, &nick, chan, &e.user, &e.host, &e.server, &e.nick, &e.flags, e.hops, &e.realname,
        ));
    }
    session.send(&numeric::EndOfWho::new(&server, &nick, chan));
    true
}

fn send_version(session: &mut ClientSession, upstream: &Arc<dyn UpstreamLink>) -> bool {
    let (server, nick) = (upstream.server_name(), upstream.current_nick());
    let mut answered = false;

    if let (Some(version), Some(features)) = (upstream.server_version(), upstream.server_features()) {
        session.send(&numeric::Version::new(&server, &nick, &version, &server, &features));
        answered = true;
    }

    answered |= send_isupport(session, upstream.as_ref(), &nick);
    answered
}

/// Replay the cached ISUPPORT list to the client, addressed to `nick`.
/// Returns false if nothing is cached.
pub(crate) fn send_isupport(session: &mut ClientSession, upstream: &dyn UpstreamLink, nick: &str) -> bool {
    let lines = isupport_lines(&upstream.isupport());
    let server = upstream.server_name();

    for line in &lines {
        session.send(&numeric::ISupport::new(&server, nick, line));
    }
    !lines.is_empty()
}

/// `SYNTH <command> <target>`: run a query through the cache explicitly
pub fn handle_synth_command(session: &mut ClientSession, args: &[String]) {
    let query = args
        .split_first()
        .and_then(|(command, rest)| SynthQuery::parse(command, rest));

    match query {
        Some(query) => {
            synthesize(session, &query);
        }
        None => {
            session.bnc_notice("Syntax: SYNTH command parameter");
            session.bnc_notice("supported commands are: mode, topic, names, version, who");
        }
    }
}
