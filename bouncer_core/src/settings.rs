use parking_lot::RwLock;

pub const PRODUCT_NAME: &str = "bouncer";
pub const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Nickname of the pseudo-user that answers administrative commands
pub const ADMIN_NICK: &str = "-bnc";

/// Process-wide settings consulted by client sessions
#[derive(Debug)]
pub struct BouncerSettings {
    /// Host part of the bouncer's synthetic identities
    pub server_name: String,
    /// Outbound queue ceiling for non-admin sessions, in bytes
    pub sendq_limit: usize,
    /// Whether a client's QUIT message becomes the user's away text
    pub quit_away: bool,
    motd: RwLock<Option<String>>,
}

impl BouncerSettings {
    pub fn new(server_name: impl Into<String>, sendq_limit: usize, quit_away: bool) -> Self {
        Self {
            server_name: server_name.into(),
            sendq_limit,
            quit_away,
            motd: RwLock::new(None),
        }
    }

    pub fn motd(&self) -> Option<String> {
        self.motd.read().clone()
    }

    /// Replace the message of the day; an empty string clears it
    pub fn set_motd(&self, motd: &str) {
        *self.motd.write() = Some(motd.to_string()).filter(|m| !m.is_empty());
    }
}

impl Default for BouncerSettings {
    fn default() -> Self {
        Self::new("bouncer.local", 10 * 1024, true)
    }
}
