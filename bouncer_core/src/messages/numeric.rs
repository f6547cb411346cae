use bouncer_macros::define_numerics;

define_numerics! {
    001(Welcome) => { (nick: &str) => ":Welcome to the Internet Relay Network {nick}" },
    005(ISupport) => { (data: &str) => "{data} :are supported by this server" },

    311(WhoisUser) => { (nick: &str, user: &str, host: &str, realname: &str) => "{nick} {user} {host} * :{realname}" },
    312(WhoisServer) => { (nick: &str, server: &str, info: &str) => "{nick} {server} :{info}" },
    315(EndOfWho) => { (mask: &str) => "{mask} :End of /WHO list." },
    318(EndOfWhois) => { (nick: &str) => "{nick} :End of /WHOIS list." },

    324(ChannelModeIs) => { (chan: &str, modes: &str) => "{chan} {modes}" },
    329(ChannelCreationTime) => { (chan: &str, created: i64) => "{chan} {created}" },
    332(TopicIs) => { (chan: &str, text: &str) => "{chan} :{text}" },
    333(TopicSetBy) => { (chan: &str, setter: &str, set_at: i64) => "{chan} {setter} {set_at}" },

    351(Version) => { (version: &str, server: &str, comments: &str) => "{version} {server} :{comments}" },
    352(WhoReply) => { (chan: &str, user: &str, host: &str, server: &str, nick: &str, flags: &str, hops: u32, realname: &str)
                            => "{chan} {user} {host} {server} {nick} {flags} :{hops} {realname}" },
    353(NamesReply) => { (chan: &str, content: &str) => "= {chan} :{content}" },
    366(EndOfNames) => { (chan: &str) => "{chan} :End of /NAMES list." },
    367(BanList) => { (chan: &str, mask: &str, setter: &str, set_at: i64) => "{chan} {mask} {setter} {set_at}" },
    368(EndOfBanList) => { (chan: &str) => "{chan} :End of Channel Ban List" },

    372(Motd) => { (line: &str) => ":- {line}" },
    375(MotdStart) => { (server: &str) => ":- {server} Message of the Day -" },
    376(EndOfMotd) => { () => ":End of /MOTD command." },

    422(NoMotd) => { () => ":MOTD File is missing" },
    461(NotEnoughParameters) => { (command: &str) => "{command} :Not enough parameters" },
    462(AlreadyRegistered) => { () => ":You may not reregister" },
}
