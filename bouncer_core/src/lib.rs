//! Client-facing core of an IRC session bouncer.
//!
//! Each user of the bouncer has one long-lived connection to an IRC network,
//! reached through the [`UpstreamLink`](upstream::UpstreamLink) trait. This
//! crate handles the other side: client connections come in through
//! `client_listener`, have their hostname looked up via `dns_client`, and
//! become [`ClientSession`]s.
//!
//! # Line handling
//!
//! Lines from a session are parsed by [`client_message`], then passed to
//! [`router::process_line`]. Until the session has authenticated, only the
//! registration commands are looked at ([`auth`]). Afterwards, each line is
//! either answered locally or forwarded unchanged upstream:
//!
//!  * commands addressed to the bouncer itself are handled by [`command`];
//!  * channel queries that the upstream cache can answer are synthesised by
//!    [`synth`];
//!  * everything else goes to the user's upstream connection.
//!
//! Handlers only ever hold their own session and a shared view of the rest.
//! Changes to other sessions or to the process are emitted as
//! [`CommandAction`](command::CommandAction)s, which the [`BouncerServer`]
//! event loop applies once the line has been handled.
//!
//! # Upgrades
//!
//! Authenticated clear-text sessions can be frozen ([`freeze`]), leaving
//! their sockets open across an `exec` of the process, and thawed again in
//! the new process image without the client noticing.

mod utils;
mod movable;

pub mod messages;
pub mod client_message;
pub mod errors;
pub mod settings;

pub mod upstream;
pub mod directory;

mod session;
pub use session::*;

pub mod auth;
pub mod command;
pub mod router;
pub mod synth;
mod replay;

pub mod freeze;
pub use freeze::{FreezeRefused, FreezeStore};

mod session_collection;
pub use session_collection::*;

pub mod server;
pub use server::{BouncerServer, BouncerState};

pub use utils::OrLog;

#[cfg(test)]
mod test_utils;
