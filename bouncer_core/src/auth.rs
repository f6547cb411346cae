//! Registration and authentication of client sessions.
//!
//! Until a session is attached to a user, only `NICK`, `USER`, `PASS` and
//! `QUIT` mean anything. Each of the first three contributes to the session's
//! [`Credentials`]; once nick, username and either a password or a client
//! certificate are all present, the tuple is resolved against the user
//! directory. A given tuple is only ever resolved once.

use crate::client_message::ClientMessage;
use crate::command::{CommandAction, CommandContext};
use crate::directory::{UserDirectory, UserIdentity};
use crate::messages::{message, numeric, Hostmask};
use crate::replay;
use crate::session::ClientSession;
use crate::settings::PRODUCT_NAME;

use std::net::IpAddr;
use std::sync::Arc;

/// Where a session is in the registration process
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AuthState {
    /// Nothing received yet
    New,
    /// A nickname has been given
    NickSet,
    /// Nick, username and a credential are all present
    Credentialed,
    /// The credentials are being checked against the user directory
    Resolving,
    /// Authenticated, with an owning user identity
    Attached,
    /// Authentication failed; the session is being torn down
    Rejected,
}

/// Registration details accumulated from the client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub nick: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Fingerprint of the client's TLS certificate
    pub certificate: Option<String>,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        self.nick.is_some()
            && self.username.is_some()
            && (self.password.is_some() || self.certificate.is_some())
    }
}

/// Why an authentication attempt was refused. Only ever logged; the client
/// sees the same message whatever the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AuthFailure {
    #[strum(serialize = "unknown user")]
    UnknownUser,
    #[strum(serialize = "blocked ip")]
    BlockedIp,
    #[strum(serialize = "bad password")]
    BadPassword,
    #[strum(serialize = "host not allowed")]
    HostNotAllowed,
    Suspended,
    #[strum(serialize = "ambiguous certificate")]
    AmbiguousCertificate,
}

pub enum AuthDecision {
    /// No usable credential yet
    Incomplete,
    Accept(Arc<dyn UserIdentity>),
    Reject(AuthFailure),
}

const GENERIC_AUTH_FAILURE: &str = "*** Unknown user or wrong password.";
const PASSWORD_REQUIRED: &str =
    "*** This server requires a password. Use /QUOTE PASS thepassword to supply a password now.";

enum CertificateMatch {
    None,
    User(Arc<dyn UserIdentity>),
    /// Registered to several users, none of them the one requested
    Ambiguous,
}

/// Find the identity a client certificate authenticates as, if any.
///
/// A certificate registered to exactly one user is sufficient on its own. One
/// registered to several users only counts if the client asked for one of
/// them by username.
fn certificate_identity(
    fingerprint: &str,
    username: &str,
    directory: &dyn UserDirectory,
) -> CertificateMatch {
    let mut matches: Vec<_> = directory
        .users()
        .into_iter()
        .filter(|u| u.matches_certificate(fingerprint))
        .collect();

    match matches.len() {
        0 => CertificateMatch::None,
        1 => matches.pop().map_or(CertificateMatch::None, CertificateMatch::User),
        count => match matches
            .into_iter()
            .find(|u| u.name().eq_ignore_ascii_case(username))
        {
            Some(user) => CertificateMatch::User(user),
            None => {
                tracing::debug!(%fingerprint, %username, count, "Certificate matches several users, none of them requested");
                CertificateMatch::Ambiguous
            }
        },
    }
}

/// Resolve a set of credentials against the user directory
pub fn authenticate(
    credentials: &Credentials,
    peer_addr: IpAddr,
    hostname: &str,
    directory: &dyn UserDirectory,
) -> AuthDecision {
    let (Some(_), Some(username)) = (&credentials.nick, &credentials.username) else {
        return AuthDecision::Incomplete;
    };

    let forced = match &credentials.certificate {
        Some(fp) => certificate_identity(fp, username, directory),
        None => CertificateMatch::None,
    };
    let by_certificate = matches!(forced, CertificateMatch::User(_));

    let user = match (forced, &credentials.password) {
        (CertificateMatch::User(user), _) => Some(user),
        (_, Some(_)) => directory.lookup(username),
        (CertificateMatch::Ambiguous, None) => {
            return AuthDecision::Reject(AuthFailure::AmbiguousCertificate)
        }
        (CertificateMatch::None, None) => return AuthDecision::Incomplete,
    };

    let Some(user) = user else {
        return AuthDecision::Reject(AuthFailure::UnknownUser);
    };

    let password_ok = by_certificate
        || credentials
            .password
            .as_deref()
            .map_or(false, |p| user.validate_password(p));

    let failure = if user.is_ip_blocked(peer_addr) {
        Some(AuthFailure::BlockedIp)
    } else if !password_ok {
        Some(AuthFailure::BadPassword)
    } else if !user.can_host_connect(hostname) {
        Some(AuthFailure::HostNotAllowed)
    } else if user.is_suspended() {
        Some(AuthFailure::Suspended)
    } else {
        None
    };

    match failure {
        Some(reason) => {
            if !matches!(reason, AuthFailure::BlockedIp | AuthFailure::Suspended) {
                user.log_bad_login(peer_addr);
            }
            AuthDecision::Reject(reason)
        }
        None => AuthDecision::Accept(user),
    }
}

/// Handle one line from a session that isn't attached yet
pub fn handle_unauthenticated(
    session: &mut ClientSession,
    msg: &ClientMessage,
    ctx: &mut CommandContext,
) {
    match msg.command.as_str() {
        "NICK" => {
            let Some(nick) = msg.arg(0) else {
                return not_enough_parameters(session, "NICK");
            };

            if let Some(old) = session.credentials.nick.clone() {
                if old != nick {
                    let user = session.credentials.username.clone().unwrap_or_else(|| old.clone());
                    let host = session.settings().server_name.clone();
                    let source = Hostmask {
                        nick: &old,
                        user: &user,
                        host: &host,
                    };
                    session.send(&message::Nick::new(&source, nick));
                }
            }

            session.credentials.nick = Some(nick.to_string());
            if session.state == AuthState::New {
                session.state = AuthState::NickSet;
            }
            try_authenticate(session, ctx);
        }
        "USER" => {
            let Some(username) = msg.arg(0) else {
                return not_enough_parameters(session, "USER");
            };

            if session.credentials.username.is_some() {
                let source = session.settings().server_name.clone();
                let target = session.reply_target().to_string();
                session.send(&numeric::AlreadyRegistered::new(&source, &target));
                return;
            }

            session.credentials.username = Some(username.to_string());
            try_authenticate(session, ctx);
        }
        "PASS" => {
            let Some(password) = msg.arg(0) else {
                return not_enough_parameters(session, "PASS");
            };

            session.credentials.password = Some(password.to_string());
            try_authenticate(session, ctx);
        }
        "QUIT" => {
            session.kill(&format!("*** Thanks for flying with {}", PRODUCT_NAME));
        }
        _ => {}
    }
}

fn not_enough_parameters(session: &mut ClientSession, command: &str) {
    let source = session.settings().server_name.clone();
    let target = session.reply_target().to_string();
    session.send(&numeric::NotEnoughParameters::new(&source, &target, command));
}

/// Resolve the session's credentials if they're complete and haven't been
/// tried before.
fn try_authenticate(session: &mut ClientSession, ctx: &mut CommandContext) {
    if session.state == AuthState::Attached || session.state == AuthState::Rejected {
        return;
    }

    let ready = session.credentials.nick.is_some() && session.credentials.username.is_some();
    if !ready {
        return;
    }
    if !session.credentials.is_complete() {
        session.notice(PASSWORD_REQUIRED);
        return;
    }
    if session.last_attempt.as_ref() == Some(&session.credentials) {
        return;
    }

    session.last_attempt = Some(session.credentials.clone());
    session.state = AuthState::Credentialed;

    let peer_addr = session.peer_addr();
    let hostname = session
        .hostname()
        .map(str::to_string)
        .unwrap_or_else(|| peer_addr.to_string());

    session.state = AuthState::Resolving;
    match authenticate(&session.credentials, peer_addr, &hostname, ctx.directory) {
        AuthDecision::Incomplete => {
            session.state = AuthState::NickSet;
            session.notice(PASSWORD_REQUIRED);
        }
        AuthDecision::Reject(reason) => {
            tracing::warn!(
                conn = %session.id(),
                username = ?session.credentials.username,
                %peer_addr,
                %hostname,
                %reason,
                "Authentication failed"
            );
            session.state = AuthState::Rejected;
            session.kill(GENERIC_AUTH_FAILURE);
        }
        AuthDecision::Accept(user) => attach(session, user, ctx),
    }
}

/// Make `user` the owner of `session`, and bring the client up to date with
/// the user's upstream state.
pub(crate) fn attach(
    session: &mut ClientSession,
    user: Arc<dyn UserIdentity>,
    ctx: &mut CommandContext,
) {
    tracing::info!(
        conn = %session.id(),
        user = %user.name(),
        hostname = ?session.hostname(),
        "Client authenticated"
    );

    session.state = AuthState::Attached;
    session.owner = Some(Arc::clone(&user));
    user.client_attached();

    ctx.action(CommandAction::Attached {
        conn: session.id(),
        user: user.name().to_string(),
    });

    replay::replay_session(session);
}
