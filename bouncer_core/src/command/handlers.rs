use super::*;
use crate::client_message::ClientMessage;
use crate::directory::HostListError;
use crate::utils::LineWrapper;

use chrono::TimeZone;

type Args<'a> = &'a [String];

const NOT_CONNECTED: &str = "You are not connected to a server.";

fn done(session: &mut ClientSession) {
    session.bnc_notice("Done.");
}

pub(super) fn status(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    _args: Args,
    _ctx: &mut CommandContext,
) {
    session.bnc_notice(&format!("Username: {}", owner.name()));
    session.bnc_notice(&format!("This is {} {}", PRODUCT_NAME, PRODUCT_VERSION));
    session.bnc_notice(&format!(
        "You are {}an admin.",
        if owner.is_admin() { "" } else { "not " }
    ));
    let queues = format!(
        "Client: sendq: {}, recvq: {}",
        session.sendq_len(),
        session.recvq_len()
    );
    session.bnc_notice(&queues);

    if let Some(upstream) = owner.upstream() {
        session.bnc_notice(&format!(
            "IRC: {} as {}",
            upstream.server_name(),
            upstream.current_nick()
        ));
        session.bnc_notice("Channels:");
        for channel in upstream.channels() {
            session.bnc_notice(&channel);
        }
        session.bnc_notice("End of CHANNELS.");
    }
}

pub(super) fn hosts(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    _args: Args,
    _ctx: &mut CommandContext,
) {
    let hosts = owner.host_allows();

    session.bnc_notice("Hostmasks");
    session.bnc_notice("---------");
    for host in &hosts {
        session.bnc_notice(host);
    }
    if hosts.is_empty() {
        session.bnc_notice("*");
    }
    session.bnc_notice("End of HOSTS.");
}

pub(super) fn hostadd(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    args: Args,
    _ctx: &mut CommandContext,
) {
    let Some(mask) = args.first() else {
        return session.bnc_notice("Syntax: HOSTADD hostmask");
    };

    if !owner.host_allows().is_empty() && owner.can_host_connect(mask) {
        return session.bnc_notice("This hostmask is already added or another hostmask supercedes it.");
    }

    match owner.add_host_allow(mask) {
        Ok(()) => done(session),
        Err(HostListError::Full) => session.bnc_notice(&format!(
            "You may not add more than {} hostmasks.",
            crate::directory::MAX_HOST_ALLOWS
        )),
        Err(HostListError::Duplicate(_)) => {
            session.bnc_notice("This hostmask is already added or another hostmask supercedes it.")
        }
    }
}

pub(super) fn hostdel(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    args: Args,
    _ctx: &mut CommandContext,
) {
    let Some(mask) = args.first() else {
        return session.bnc_notice("Syntax: HOSTDEL hostmask");
    };

    owner.remove_host_allow(mask);
    done(session);
}

pub(super) fn partall(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    _args: Args,
    _ctx: &mut CommandContext,
) {
    let Some(upstream) = owner.upstream() else {
        return session.bnc_notice(NOT_CONNECTED);
    };

    for targets in LineWrapper::<',', _, _>::new(400, upstream.channels().into_iter()) {
        upstream.write_line(&format!("PART {}", targets));
    }
    done(session);
}

pub(super) fn direct(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    args: Args,
    _ctx: &mut CommandContext,
) {
    let Some((command, rest)) = args.split_first() else {
        return session.bnc_notice("Syntax: DIRECT command [parameters]");
    };
    let Some(upstream) = owner.upstream() else {
        return session.bnc_notice(NOT_CONNECTED);
    };

    let line = ClientMessage {
        command: command.clone(),
        args: rest.to_vec(),
    };
    upstream.write_line(&line.to_line());
    done(session);
}

pub(super) fn motd(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    args: Args,
    _ctx: &mut CommandContext,
) {
    if args.is_empty() || !owner.is_admin() {
        let current = session.settings().motd();
        return session.bnc_notice(&format!(
            "Current MOTD: {}",
            current.as_deref().unwrap_or("(none)")
        ));
    }

    session.settings().set_motd(&args.join(" "));
    tracing::info!(user = %owner.name(), "MOTD changed");
    done(session);
}

fn last_seen(user: &dyn UserIdentity, online: bool) -> String {
    match user.last_seen() {
        0 => "Never".to_string(),
        _ if online => "Now".to_string(),
        ts => chrono::Utc
            .timestamp_opt(ts, 0)
            .single()
            .map_or_else(|| ts.to_string(), |t| t.format("%c").to_string()),
    }
}

pub(super) fn who(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    _args: Args,
    ctx: &mut CommandContext,
) {
    for user in ctx.directory.users() {
        // The calling session is out of the collection while it's processed
        let client_host = if user.name() == owner.name() {
            session.hostname().map(str::to_string)
        } else {
            ctx.sessions
                .session_for_user(user.name())
                .map(|c| c.hostname().unwrap_or_default().to_string())
        };
        let online = client_host.is_some();
        let upstream = user.upstream();

        let nick = upstream
            .as_ref()
            .map(|u| u.current_nick())
            .or_else(|| user.nick())
            .unwrap_or_else(|| "<none>".to_string());
        let server = upstream.as_ref().map(|u| u.server_name()).unwrap_or_default();

        let line = format!(
            "{}{}{}{}({})@{} [{}] [Last seen: {}] :{}",
            if user.is_suspended() { "!" } else { "" },
            if user.is_admin() { "@" } else { "" },
            if online { "*" } else { "" },
            user.name(),
            nick,
            client_host.unwrap_or_default(),
            server,
            last_seen(&*user, online),
            user.realname().unwrap_or_default(),
        );
        session.bnc_notice(&line);
    }
    session.bnc_notice("End of USERS.");
}

pub(super) fn kill(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    args: Args,
    ctx: &mut CommandContext,
) {
    let Some(target) = args.first() else {
        return session.bnc_notice("Syntax: KILL username [reason]");
    };

    let own = target.eq_ignore_ascii_case(owner.name());
    if !own && ctx.sessions.session_for_user(target).is_none() {
        return session.bnc_notice("There is no such user or that user is not currently logged in.");
    }

    let reason = match &args[1..] {
        [] => "Requested.".to_string(),
        rest => rest.join(" "),
    };
    tracing::info!(user = %owner.name(), target = %target, %reason, "Admin kill");
    ctx.action(CommandAction::KillUser {
        user: target.clone(),
        reason,
    });
    done(session);
}

pub(super) fn global(
    session: &mut ClientSession,
    _owner: &Arc<dyn UserIdentity>,
    args: Args,
    ctx: &mut CommandContext,
) {
    if args.is_empty() {
        return session.bnc_notice("Syntax: GLOBAL :text");
    }
    ctx.action(CommandAction::GlobalNotice(args.join(" ")));
}

pub(super) fn suspend(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    args: Args,
    ctx: &mut CommandContext,
) {
    let Some(target) = args.first() else {
        return session.bnc_notice("Syntax: SUSPEND username");
    };
    let Some(user) = ctx.directory.lookup(target) else {
        return session.bnc_notice("There's no such user.");
    };

    user.set_suspended(true);
    if let Some(upstream) = user.upstream() {
        upstream.disconnect("Requested.");
    }
    tracing::info!(user = %owner.name(), target = %user.name(), "User suspended");

    ctx.action(CommandAction::KillUser {
        user: user.name().to_string(),
        reason: "Your account has been suspended.".to_string(),
    });
    ctx.action(CommandAction::GlobalNotice(format!(
        "User {} has been suspended.",
        user.name()
    )));
    done(session);
}

pub(super) fn unsuspend(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    args: Args,
    ctx: &mut CommandContext,
) {
    let Some(target) = args.first() else {
        return session.bnc_notice("Syntax: UNSUSPEND username");
    };
    let Some(user) = ctx.directory.lookup(target) else {
        return session.bnc_notice("There's no such user.");
    };

    user.set_suspended(false);
    tracing::info!(user = %owner.name(), target = %user.name(), "User unsuspended");

    ctx.action(CommandAction::GlobalNotice(format!(
        "User {} has been unsuspended.",
        user.name()
    )));
    done(session);
}

pub(super) fn reload(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    _args: Args,
    ctx: &mut CommandContext,
) {
    tracing::info!(user = %owner.name(), "Upgrade requested");
    session.bnc_notice("Reloading.");
    ctx.action(CommandAction::Shutdown(ShutdownAction::Upgrade));
}

pub(super) fn die(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    _args: Args,
    ctx: &mut CommandContext,
) {
    tracing::info!(user = %owner.name(), "Shutdown requested");
    session.bnc_notice("Shutting down.");
    ctx.action(CommandAction::Shutdown(ShutdownAction::Shutdown));
}
