//! Keeps the channel cache in step with what the IRC server tells us.

use bouncer_core::client_message::ClientMessage;
use bouncer_core::upstream::*;

use std::collections::HashMap;

/// Prefix characters assumed until the server sends `PREFIX`
const DEFAULT_PREFIX: &str = "(ov)@+";

#[derive(Debug, Default)]
struct TrackedChannel {
    cache: ChannelCache,
    pending_modes: Option<String>,
    pending_topic: Option<String>,
    pending_names: Vec<ChannelMember>,
    pending_bans: Vec<BanEntry>,
    pending_who: Vec<WhoEntry>,
}

impl TrackedChannel {
    fn new(name: &str) -> Self {
        Self {
            cache: ChannelCache::new(name),
            ..Default::default()
        }
    }

    fn remove_member(&mut self, nick: &str) {
        if let Some(members) = &mut self.cache.members {
            let before = members.len();
            members.retain(|m| !m.nick.eq_ignore_ascii_case(nick));
            if members.len() == before {
                return;
            }
        }
        self.cache.who = None;
    }
}

/// Everything known about the upstream connection's view of the network.
///
/// Fed one line at a time by [`process`](Self::process); read by the
/// [`UpstreamLink`] implementation.
#[derive(Debug, Default)]
pub struct ChannelTracker {
    server_name: String,
    nick: String,
    version: Option<String>,
    features: Option<String>,
    isupport: Vec<(String, Option<String>)>,
    channels: HashMap<String, TrackedChannel>,
}

fn channel_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn source_nick(line: &str) -> Option<&str> {
    let source = line.trim_start_matches(' ').strip_prefix(':')?;
    let source = source.split(' ').next()?;
    Some(source.split(&['!', '@'][..]).next().unwrap_or(source))
}

fn source_mask(line: &str) -> Option<&str> {
    line.trim_start_matches(' ').strip_prefix(':')?.split(' ').next()
}

impl ChannelTracker {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            ..Default::default()
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn features(&self) -> Option<&str> {
        self.features.as_deref()
    }

    pub fn isupport(&self) -> &[(String, Option<String>)] {
        &self.isupport
    }

    pub fn channel(&self, name: &str) -> Option<ChannelCache> {
        self.channels.get(&channel_key(name)).map(|c| c.cache.clone())
    }

    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<_> = self.channels.values().map(|c| c.cache.name.clone()).collect();
        names.sort();
        names
    }

    fn is_me(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.nick)
    }

    /// `(modes)prefixes` from the server's `PREFIX` token
    fn prefix_modes(&self) -> (String, String) {
        let value = self
            .isupport
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("PREFIX"))
            .and_then(|(_, value)| value.clone())
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

        value
            .strip_prefix('(')
            .and_then(|v| v.split_once(')'))
            .map(|(modes, prefixes)| (modes.to_string(), prefixes.to_string()))
            .unwrap_or_default()
    }

    fn tracked(&mut self, name: &str) -> Option<&mut TrackedChannel> {
        self.channels.get_mut(&channel_key(name))
    }

    /// Update state from one line received from the server
    pub fn process(&mut self, line: &str) {
        let Some(message) = ClientMessage::parse(line) else {
            return;
        };
        let source = source_nick(line).unwrap_or_default();
        let args = &message.args;
        let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or_default();

        match message.command.as_str() {
            "001" => {
                self.server_name = source.to_string();
                if !arg(0).is_empty() {
                    self.nick = arg(0).to_string();
                }
            }
            "005" if args.len() > 2 => {
                for token in &args[1..args.len() - 1] {
                    self.update_isupport(token);
                }
            }
            "351" => {
                self.version = args.get(1).cloned();
                self.features = args.get(3).cloned();
            }
            "NICK" => self.nick_change(source, arg(0)),
            "JOIN" => {
                for chan in arg(0).split(',').filter(|c| !c.is_empty()) {
                    self.join(source, chan);
                }
            }
            "PART" => {
                for chan in arg(0).split(',').filter(|c| !c.is_empty()) {
                    self.part(source, chan);
                }
            }
            "KICK" => self.part(arg(1), arg(0)),
            "QUIT" => {
                for channel in self.channels.values_mut() {
                    channel.remove_member(source);
                }
            }
            "MODE" => self.mode_change(arg(0), arg(1)),
            "TOPIC" => {
                let setter = source_mask(line).unwrap_or(source).to_string();
                if let Some(chan) = self.tracked(arg(0)) {
                    chan.cache.topic = Some(Topic {
                        text: arg(1).to_string(),
                        setter,
                        set_at: chrono::Utc::now().timestamp(),
                    });
                }
            }
            "324" => {
                let modes = args.get(2..).map(|m| m.join(" ")).unwrap_or_default();
                if let Some(chan) = self.tracked(arg(1)) {
                    chan.pending_modes = Some(modes);
                }
            }
            "329" => {
                let created = arg(2).parse().unwrap_or(0);
                if let Some(chan) = self.tracked(arg(1)) {
                    if let Some(modes) = chan.pending_modes.take() {
                        chan.cache.modes = Some(ChannelModes { modes, created });
                    } else if let Some(modes) = &mut chan.cache.modes {
                        modes.created = created;
                    }
                }
            }
            "331" => {
                if let Some(chan) = self.tracked(arg(1)) {
                    chan.cache.topic = None;
                    chan.pending_topic = None;
                }
            }
            "332" => {
                let text = arg(2).to_string();
                if let Some(chan) = self.tracked(arg(1)) {
                    chan.pending_topic = Some(text);
                }
            }
            "333" => {
                let setter = arg(2).to_string();
                let set_at = arg(3).parse().unwrap_or(0);
                if let Some(chan) = self.tracked(arg(1)) {
                    if let Some(text) = chan.pending_topic.take() {
                        chan.cache.topic = Some(Topic { text, setter, set_at });
                    }
                }
            }
            "353" => {
                let (_, prefixes) = self.prefix_modes();
                let members: Vec<_> = arg(3)
                    .split(' ')
                    .filter(|n| !n.is_empty())
                    .map(|token| {
                        let nick = token.trim_start_matches(|c: char| prefixes.contains(c));
                        ChannelMember {
                            nick: nick.to_string(),
                            prefixes: token[..token.len() - nick.len()].to_string(),
                        }
                    })
                    .collect();
                if let Some(chan) = self.tracked(arg(2)) {
                    chan.pending_names.extend(members);
                }
            }
            "366" => {
                if let Some(chan) = self.tracked(arg(1)) {
                    chan.cache.members = Some(std::mem::take(&mut chan.pending_names));
                }
            }
            "367" => {
                let entry = BanEntry {
                    mask: arg(2).to_string(),
                    setter: arg(3).to_string(),
                    set_at: arg(4).parse().unwrap_or(0),
                };
                if let Some(chan) = self.tracked(arg(1)) {
                    chan.pending_bans.push(entry);
                }
            }
            "368" => {
                if let Some(chan) = self.tracked(arg(1)) {
                    chan.cache.bans = Some(std::mem::take(&mut chan.pending_bans));
                }
            }
            "352" => {
                let (hops, realname) = arg(7).split_once(' ').unwrap_or((arg(7), ""));
                let entry = WhoEntry {
                    user: arg(2).to_string(),
                    host: arg(3).to_string(),
                    server: arg(4).to_string(),
                    nick: arg(5).to_string(),
                    flags: arg(6).to_string(),
                    hops: hops.parse().unwrap_or(0),
                    realname: realname.to_string(),
                };
                if let Some(chan) = self.tracked(arg(1)) {
                    chan.pending_who.push(entry);
                }
            }
            "315" => {
                if let Some(chan) = self.tracked(arg(1)) {
                    chan.cache.who = Some(std::mem::take(&mut chan.pending_who));
                }
            }
            _ => (),
        }
    }

    fn update_isupport(&mut self, token: &str) {
        if let Some(name) = token.strip_prefix('-') {
            self.isupport.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
            return;
        }

        let (name, value) = match token.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (token, None),
        };
        match self.isupport.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(name)) {
            Some(existing) => existing.1 = value,
            None => self.isupport.push((name.to_string(), value)),
        }
    }

    fn nick_change(&mut self, old: &str, new: &str) {
        if new.is_empty() {
            return;
        }
        if self.is_me(old) {
            self.nick = new.to_string();
        }
        for channel in self.channels.values_mut() {
            if let Some(member) = channel
                .cache
                .members
                .iter_mut()
                .flatten()
                .find(|m| m.nick.eq_ignore_ascii_case(old))
            {
                member.nick = new.to_string();
                channel.cache.who = None;
            }
        }
    }

    fn join(&mut self, nick: &str, chan: &str) {
        if self.is_me(nick) {
            tracing::debug!(channel = %chan, "Joined channel");
            self.channels.insert(channel_key(chan), TrackedChannel::new(chan));
        } else if let Some(channel) = self.tracked(chan) {
            if let Some(members) = &mut channel.cache.members {
                members.push(ChannelMember {
                    nick: nick.to_string(),
                    prefixes: String::new(),
                });
            }
            channel.cache.who = None;
        }
    }

    fn part(&mut self, nick: &str, chan: &str) {
        if self.is_me(nick) {
            tracing::debug!(channel = %chan, "Left channel");
            self.channels.remove(&channel_key(chan));
        } else if let Some(channel) = self.tracked(chan) {
            channel.remove_member(nick);
        }
    }

    fn mode_change(&mut self, target: &str, changes: &str) {
        let (prefix_modes, _) = self.prefix_modes();
        let Some(channel) = self.tracked(target) else {
            return;
        };

        channel.cache.modes = None;
        if changes.contains('b') {
            channel.cache.bans = None;
        }
        if changes.chars().any(|c| prefix_modes.contains(c)) {
            channel.cache.members = None;
            channel.cache.who = None;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tracker(lines: &[&str]) -> ChannelTracker {
        let mut tracker = ChannelTracker::new("alice");
        for line in lines {
            tracker.process(line);
        }
        tracker
    }

    #[test]
    fn registration() {
        let t = tracker(&[
            ":irc.example 001 alice_ :Welcome",
            ":irc.example 005 alice_ CHANTYPES=# PREFIX=(qov)~@+ EXCEPTS :are supported by this server",
            ":irc.example 005 alice_ PREFIX=(ov)@+ -EXCEPTS NETWORK=Example :are supported by this server",
            ":irc.example 351 alice_ ircd-1.0 irc.example :TS6ow",
        ]);

        assert_eq!(t.server_name(), "irc.example");
        assert_eq!(t.nick(), "alice_");
        assert_eq!(
            t.isupport(),
            &[
                ("CHANTYPES".to_string(), Some("#".to_string())),
                ("PREFIX".to_string(), Some("(ov)@+".to_string())),
                ("NETWORK".to_string(), Some("Example".to_string())),
            ]
        );
        assert_eq!(t.version(), Some("ircd-1.0"));
        assert_eq!(t.features(), Some("TS6ow"));
    }

    #[test]
    fn join_names_and_part() {
        let mut t = tracker(&[
            ":alice!a@host JOIN #rust",
            ":irc.example 353 alice = #rust :@alice +bob carol",
            ":irc.example 366 alice #rust :End of /NAMES list.",
        ]);

        assert_eq!(t.channels(), vec!["#rust"]);
        let members = t.channel("#RUST").unwrap().members.unwrap();
        assert_eq!(
            members,
            vec![
                ChannelMember { nick: "alice".to_string(), prefixes: "@".to_string() },
                ChannelMember { nick: "bob".to_string(), prefixes: "+".to_string() },
                ChannelMember { nick: "carol".to_string(), prefixes: String::new() },
            ]
        );

        t.process(":dave!d@host JOIN #rust");
        t.process(":bob!b@host PART #rust :bye");
        t.process(":carol!c@host NICK :caroline");
        let nicks: Vec<_> = t.channel("#rust").unwrap().members.unwrap().into_iter().map(|m| m.nick).collect();
        assert_eq!(nicks, vec!["alice", "caroline", "dave"]);

        t.process(":op!o@host KICK #rust alice :out");
        assert!(t.channel("#rust").is_none());
        assert!(t.channels().is_empty());
    }

    #[test]
    fn topic_and_modes() {
        let mut t = tracker(&[
            ":alice!a@host JOIN #rust",
            ":irc.example 324 alice #rust +ntk secret",
            ":irc.example 329 alice #rust 1234",
            ":irc.example 332 alice #rust :Rust talk",
            ":irc.example 333 alice #rust ferris 7",
        ]);

        let cache = t.channel("#rust").unwrap();
        assert_eq!(
            cache.modes,
            Some(ChannelModes { modes: "+ntk secret".to_string(), created: 1234 })
        );
        assert_eq!(
            cache.topic,
            Some(Topic { text: "Rust talk".to_string(), setter: "ferris".to_string(), set_at: 7 })
        );

        t.process(":bob!b@host TOPIC #rust :new topic");
        let topic = t.channel("#rust").unwrap().topic.unwrap();
        assert_eq!(topic.text, "new topic");
        assert_eq!(topic.setter, "bob!b@host");

        t.process(":bob!b@host MODE #rust -k secret");
        let cache = t.channel("#rust").unwrap();
        assert_eq!(cache.modes, None);
        assert!(cache.topic.is_some());
    }

    #[test]
    fn mode_invalidation() {
        let mut t = tracker(&[
            ":alice!a@host JOIN #rust",
            ":irc.example 353 alice = #rust :@alice bob",
            ":irc.example 366 alice #rust :End",
            ":irc.example 367 alice #rust *!*@spam ferris 10",
            ":irc.example 368 alice #rust :End of Channel Ban List",
            ":irc.example 352 alice #rust b host irc.example bob H :0 Bob Smith",
            ":irc.example 315 alice #rust :End of /WHO list.",
        ]);

        let cache = t.channel("#rust").unwrap();
        assert_eq!(
            cache.bans,
            Some(vec![BanEntry { mask: "*!*@spam".to_string(), setter: "ferris".to_string(), set_at: 10 }])
        );
        let who = cache.who.unwrap();
        assert_eq!(who[0].nick, "bob");
        assert_eq!(who[0].hops, 0);
        assert_eq!(who[0].realname, "Bob Smith");

        t.process(":alice!a@host MODE #rust +b *!*@more");
        let cache = t.channel("#rust").unwrap();
        assert_eq!(cache.bans, None);
        assert!(cache.members.is_some());

        t.process(":alice!a@host MODE #rust +v bob");
        let cache = t.channel("#rust").unwrap();
        assert_eq!(cache.members, None);
        assert_eq!(cache.who, None);
    }

    #[test]
    fn quit_removes_everywhere() {
        let mut t = tracker(&[
            ":alice!a@host JOIN #a",
            ":alice!a@host JOIN #b",
            ":irc.example 353 alice = #a :alice bob",
            ":irc.example 366 alice #a :End",
            ":irc.example 353 alice = #b :alice bob",
            ":irc.example 366 alice #b :End",
            ":bob!b@host QUIT :gone",
        ]);

        for chan in ["#a", "#b"] {
            let members = t.channel(chan).unwrap().members.unwrap();
            assert_eq!(members.len(), 1);
        }

        t.process(":alice!a@host NICK alicia");
        assert_eq!(t.nick(), "alicia");
        t.process(":alicia!a@host PART #a");
        assert_eq!(t.channels(), vec!["#b"]);
    }
}
