//! Commands addressed to the bouncer itself.
//!
//! These are reached either as `BNC <command> [args]` or as a private
//! message to the administrative pseudo-user, and are never forwarded
//! upstream. Replies are notices from the pseudo-user.

use crate::client_message::tokenize;
use crate::directory::{UserDirectory, UserIdentity};
use crate::session::ClientSession;
use crate::session_collection::SessionCollection;
use crate::settings::*;

use std::sync::Arc;

mod action;
pub use action::*;

mod help;
pub use help::CommandHelpRegistry;

mod handlers;

/// Command name for addressing the bouncer directly
pub const BNC_COMMAND: &str = "BNC";

const UNKNOWN_COMMAND: &str = "Unknown command. Try /msg -bnc help";

/// Shared state available while processing one line from a client
pub struct CommandContext<'a> {
    pub directory: &'a dyn UserDirectory,
    pub sessions: &'a SessionCollection,
    pub actions: Vec<CommandAction>,
}

impl<'a> CommandContext<'a> {
    pub fn new(directory: &'a dyn UserDirectory, sessions: &'a SessionCollection) -> Self {
        Self {
            directory,
            sessions,
            actions: Vec::new(),
        }
    }

    pub fn action(&mut self, action: CommandAction) {
        self.actions.push(action);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum CommandCategory {
    Admin,
    User,
}

type AdminHandler = fn(&mut ClientSession, &Arc<dyn UserIdentity>, &[String], &mut CommandContext);

/// One administrative command
pub struct AdminCommand {
    pub name: &'static str,
    pub category: CommandCategory,
    pub description: &'static str,
    pub help: &'static [&'static str],
    pub admin_only: bool,
    handler: AdminHandler,
}

macro_rules! admin_command {
    ($name:literal, $category:ident, $admin:literal, $handler:path, $desc:literal, [$($help:literal),* $(,)?]) => {
        AdminCommand {
            name: $name,
            category: CommandCategory::$category,
            description: $desc,
            help: &[$($help),*],
            admin_only: $admin,
            handler: $handler,
        }
    };
}

static COMMANDS: &[AdminCommand] = &[
    admin_command!("help", User, false, help::help_command,
        "displays a list of commands or information about individual commands",
        ["Syntax: help [command]", "Displays a list of commands or information about individual commands."]),
    admin_command!("status", User, false, handlers::status,
        "tells you the current status",
        ["Syntax: status", "Displays information about your user and your connections."]),
    admin_command!("hosts", User, false, handlers::hosts,
        "lists all hostmasks which are permitted to use this account",
        ["Syntax: hosts", "Lists all hosts which are permitted to use this account."]),
    admin_command!("hostadd", User, false, handlers::hostadd,
        "adds a hostmask",
        ["Syntax: hostadd <host>", "Adds a host to your hostlist. E.g. *.example.org"]),
    admin_command!("hostdel", User, false, handlers::hostdel,
        "removes a hostmask",
        ["Syntax: hostdel <host>", "Removes a host from your hostlist."]),
    admin_command!("partall", User, false, handlers::partall,
        "parts all channels",
        ["Syntax: partall", "Parts every channel you are currently in."]),
    admin_command!("direct", User, false, handlers::direct,
        "sends a raw line to the irc server",
        ["Syntax: direct <line>", "Sends a line to the irc server without any processing by the bouncer."]),
    admin_command!("motd", User, false, handlers::motd,
        "shows or sets the bouncer's motd",
        ["Syntax: motd [text]", "Shows the motd. Admins may also change it."]),
    admin_command!("who", Admin, true, handlers::who,
        "shows users",
        ["Syntax: who", "Shows a list of all users.",
         "Flags (which are displayed in front of the username):",
         "@ user is an admin", "* user is currently logged in", "! user is suspended"]),
    admin_command!("kill", Admin, true, handlers::kill,
        "disconnects a user from the bouncer",
        ["Syntax: kill <username> [reason]", "Disconnects a user's client from the bouncer."]),
    admin_command!("global", Admin, true, handlers::global,
        "sends a global notice to all bouncer users",
        ["Syntax: global <text>", "Sends a notice to all currently connected users."]),
    admin_command!("suspend", Admin, true, handlers::suspend,
        "suspends a user",
        ["Syntax: suspend <username>", "Suspends an account, and disconnects it."]),
    admin_command!("unsuspend", Admin, true, handlers::unsuspend,
        "unsuspends a user",
        ["Syntax: unsuspend <username>", "Removes a suspension from the specified account."]),
    admin_command!("reload", Admin, true, handlers::reload,
        "restarts the bouncer without disconnecting clients",
        ["Syntax: reload", "Re-executes the bouncer, handing over connected clients where possible."]),
    admin_command!("die", Admin, true, handlers::die,
        "terminates the bouncer",
        ["Syntax: die", "Terminates the bouncer."]),
];

fn find_command(name: &str, is_admin: bool) -> Option<&'static AdminCommand> {
    COMMANDS
        .iter()
        .find(|cmd| cmd.name.eq_ignore_ascii_case(name) && (is_admin || !cmd.admin_only))
}

/// Run an administrative command line, given as a list of words with the
/// command name first.
pub fn run_admin_command(session: &mut ClientSession, args: &[String], ctx: &mut CommandContext) {
    let Some(owner) = session.owner().cloned() else {
        return;
    };
    let Some((name, rest)) = args.split_first() else {
        session.bnc_notice(&format!("Try /{} help", BNC_COMMAND.to_ascii_lowercase()));
        return;
    };

    match find_command(name, owner.is_admin()) {
        Some(cmd) => {
            tracing::debug!(conn = %session.id(), user = %owner.name(), command = %cmd.name, "Administrative command");
            (cmd.handler)(session, &owner, rest, ctx);
        }
        None => session.bnc_notice(UNKNOWN_COMMAND),
    }
}

/// Run an administrative command sent as the text of a private message
pub fn run_admin_message(session: &mut ClientSession, text: &str, ctx: &mut CommandContext) {
    run_admin_command(session, &tokenize(text), ctx);
}
