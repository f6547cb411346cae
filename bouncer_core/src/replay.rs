//! Bringing a newly attached client up to date.

use crate::messages::{message, numeric, Hostmask};
use crate::session::ClientSession;
use crate::synth::{self, SynthQuery};

/// Send a freshly attached client everything it would have seen had it
/// registered with the upstream server itself: its real nickname, welcome
/// and ISUPPORT numerics, the MOTD, and the channels it's in.
pub(crate) fn replay_session(session: &mut ClientSession) {
    let Some(owner) = session.owner().cloned() else {
        return;
    };
    let upstream = owner.upstream();
    let server = session.settings().server_name.clone();

    let client_nick = session.nick().unwrap_or_else(|| owner.name()).to_string();
    let nick = upstream
        .as_ref()
        .map(|u| u.current_nick())
        .or_else(|| owner.nick())
        .unwrap_or_else(|| client_nick.clone());

    if nick != client_nick {
        let source = Hostmask {
            nick: &client_nick,
            user: owner.name(),
            host: &server,
        };
        session.send(&message::Nick::new(&source, &nick));
        session.credentials.nick = Some(nick.clone());
    }

    session.send(&numeric::Welcome::new(&server, &nick, &nick));
    if let Some(upstream) = &upstream {
        synth::send_isupport(session, upstream.as_ref(), &nick);
    }
    send_motd(session, &server, &nick);

    let Some(upstream) = upstream else {
        session.bnc_notice("You are not connected to an irc server.");
        return;
    };

    if owner.away_text().is_some() {
        upstream.write_line("AWAY");
    }

    let host = session
        .hostname()
        .map(str::to_string)
        .unwrap_or_else(|| session.peer_addr().to_string());
    for channel in upstream.channels() {
        let source = Hostmask {
            nick: &nick,
            user: owner.name(),
            host: &host,
        };
        session.send(&message::Join::new(&source, &channel));
        synth::synthesize(session, &SynthQuery::Topic(channel.clone()));
        synth::synthesize(session, &SynthQuery::Names(channel));
    }
}

fn send_motd(session: &mut ClientSession, server: &str, nick: &str) {
    match session.settings().motd() {
        Some(motd) => {
            session.send(&numeric::MotdStart::new(server, nick, server));
            for line in motd.lines() {
                session.send(&numeric::Motd::new(server, nick, line));
            }
            session.send(&numeric::EndOfMotd::new(server, nick));
        }
        None => session.send(&numeric::NoMotd::new(server, nick)),
    }
}
