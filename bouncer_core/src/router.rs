//! Dispatch of lines received from clients.

use crate::auth;
use crate::client_message::ClientMessage;
use crate::command::{self, CommandContext, BNC_COMMAND};
use crate::messages::numeric;
use crate::session::ClientSession;
use crate::settings::{ADMIN_NICK, PRODUCT_NAME};
use crate::synth::{self, SynthQuery};

/// Process one line from a client.
///
/// Lines from an unauthenticated session only ever feed the login process.
/// Once attached, a line is either handled here or forwarded unchanged to the
/// owner's upstream connection.
pub fn process_line(session: &mut ClientSession, line: &str, ctx: &mut CommandContext) {
    let Some(msg) = ClientMessage::parse(line) else {
        return;
    };

    if !session.is_attached() {
        auth::handle_unauthenticated(session, &msg, ctx);
        return;
    }

    if route(session, &msg, ctx) {
        if let Some(upstream) = session.owner().and_then(|o| o.upstream()) {
            upstream.write_line(line);
        }
    }
}

/// Apply any local handling for a command from an attached session.
/// Returns whether the original line should still be sent upstream.
pub fn route(session: &mut ClientSession, msg: &ClientMessage, ctx: &mut CommandContext) -> bool {
    let Some(owner) = session.owner().cloned() else {
        return false;
    };

    match msg.command.as_str() {
        "QUIT" => {
            if session.settings().quit_away {
                if let Some(text) = msg.arg(0).filter(|t| !t.is_empty()) {
                    owner.set_away_text(text);
                }
            }
            session.kill(&format!("*** Thanks for flying with {}", PRODUCT_NAME));
            false
        }
        "NICK" => {
            if let Some(nick) = msg.arg(0) {
                session.credentials.nick = Some(nick.to_string());
                owner.set_nick(nick);
            }
            true
        }
        "JOIN" => {
            let (Some(channels), key) = (msg.arg(0), msg.arg(1)) else {
                return true;
            };
            let single = !channels.contains(',');

            match key {
                Some(key) if single && !key.contains(',') => {
                    owner.set_channel_key(channels, key);
                    true
                }
                None if single => match (owner.channel_key(channels), owner.upstream()) {
                    (Some(key), Some(upstream)) => {
                        upstream.write_line(&format!("JOIN {} {}", channels, key));
                        false
                    }
                    _ => true,
                },
                _ => true,
            }
        }
        "WHOIS" if msg.args.last().map_or(false, |n| n.eq_ignore_ascii_case(ADMIN_NICK)) => {
            let server = session.settings().server_name.clone();
            let nick = session.reply_target().to_string();

            session.send(&numeric::WhoisUser::new(&server, &nick, ADMIN_NICK, "bouncer", &server, PRODUCT_NAME));
            session.send(&numeric::WhoisServer::new(&server, &nick, ADMIN_NICK, &server, "IRC Bouncer"));
            session.send(&numeric::EndOfWhois::new(&server, &nick, ADMIN_NICK));
            false
        }
        "PERROR" => {
            let Some(reason) = msg.arg(0) else {
                session.bnc_notice("Syntax: PERROR :quit-msg");
                return false;
            };
            if let Some(upstream) = owner.upstream() {
                tracing::info!(user = %owner.name(), %reason, "Upstream disconnect requested");
                upstream.disconnect(reason);
            }
            false
        }
        "PRIVMSG" if msg.args.len() > 1 && msg.args[0].eq_ignore_ascii_case(ADMIN_NICK) => {
            command::run_admin_message(session, &msg.args[1], ctx);
            false
        }
        cmd if cmd == BNC_COMMAND => {
            command::run_admin_command(session, &msg.args, ctx);
            false
        }
        "SYNTH" => {
            synth::handle_synth_command(session, &msg.args);
            false
        }
        "MODE" | "TOPIC" | "NAMES" | "WHO" | "VERSION" => match SynthQuery::parse(&msg.command, &msg.args) {
            Some(query) => {
                synth::synthesize(session, &query);
                false
            }
            None => true,
        },
        _ => true,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::directory::UserIdentity;
    use crate::test_utils::*;
    use pretty_assertions::assert_eq;

    fn run(env: &TestEnv, session: &mut ClientSession, line: &str) {
        let mut ctx = env.context();
        process_line(session, line, &mut ctx);
    }

    #[test]
    fn unknown_commands_are_forwarded_verbatim() {
        let env = TestEnv::new();
        let (mut session, mut output) = env.attached_session("alice", "alice");

        run(&env, &mut session, "PRIVMSG #rust :hello   there");
        run(&env, &mut session, "PART #rust :bye");
        run(&env, &mut session, "");

        assert_eq!(
            env.upstream("alice").written(),
            vec!["PRIVMSG #rust :hello   there", "PART #rust :bye"]
        );
        assert!(output.lines().is_empty());
    }

    #[test]
    fn nick_is_remembered_and_forwarded() {
        let env = TestEnv::new();
        let (mut session, _output) = env.attached_session("alice", "alice");

        run(&env, &mut session, "NICK alice_");

        assert_eq!(env.upstream("alice").written(), vec!["NICK alice_"]);
        assert_eq!(session.nick(), Some("alice_"));
        assert_eq!(env.directory.get("alice").unwrap().nick().as_deref(), Some("alice_"));
    }

    #[test]
    fn join_keys_are_kept() {
        let env = TestEnv::new();
        let (mut session, _output) = env.attached_session("alice", "alice");
        let upstream = env.upstream("alice");

        run(&env, &mut session, "JOIN #secret hunter2");
        run(&env, &mut session, "JOIN #secret");
        run(&env, &mut session, "JOIN #a,#b");
        run(&env, &mut session, "JOIN #open");

        assert_eq!(
            upstream.written(),
            vec!["JOIN #secret hunter2", "JOIN #secret hunter2", "JOIN #a,#b", "JOIN #open"]
        );
    }

    #[test]
    fn whois_pseudo_user() {
        let env = TestEnv::new();
        let (mut session, mut output) = env.attached_session("alice", "alice");

        run(&env, &mut session, "WHOIS -BNC");

        assert!(env.upstream("alice").written().is_empty());
        assert_eq!(
            output.lines(),
            vec![
                ":bouncer.test 311 alice -bnc bouncer bouncer.test * :bouncer",
                ":bouncer.test 312 alice -bnc bouncer.test :IRC Bouncer",
                ":bouncer.test 318 alice -bnc :End of /WHOIS list.",
            ]
        );
    }

    #[test]
    fn quit_sets_away() {
        let env = TestEnv::new();
        let (mut session, mut output) = env.attached_session("alice", "alice");

        run(&env, &mut session, "QUIT :gone fishing");

        assert!(session.is_killed());
        assert_eq!(
            env.directory.get("alice").unwrap().away_text().as_deref(),
            Some("gone fishing")
        );
        assert!(env.upstream("alice").written().is_empty());
        assert_eq!(
            output.lines(),
            vec![":Notice!notice@bouncer.test NOTICE * :*** Thanks for flying with bouncer"]
        );
    }

    #[test]
    fn perror_drops_upstream() {
        let env = TestEnv::new();
        let (mut session, mut output) = env.attached_session("alice", "alice");

        run(&env, &mut session, "PERROR");
        assert_eq!(
            output.lines(),
            vec![":-bnc!bouncer@bouncer.test NOTICE alice :Syntax: PERROR :quit-msg"]
        );

        run(&env, &mut session, "PERROR :switching servers");
        assert_eq!(
            env.upstream("alice").disconnect_reason().as_deref(),
            Some("switching servers")
        );
        assert!(env.upstream("alice").written().is_empty());
    }

    #[test]
    fn setting_topic_is_not_a_query() {
        let env = TestEnv::new();
        let (mut session, _output) = env.attached_session("alice", "alice");

        run(&env, &mut session, "TOPIC #rust :new topic");

        assert_eq!(env.upstream("alice").written(), vec!["TOPIC #rust :new topic"]);
    }
}
