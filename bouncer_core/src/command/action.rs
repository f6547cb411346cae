use client_listener::ConnectionId;

/// What the server should do once the event loop regains control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    /// Exit the process
    Shutdown,
    /// Freeze every eligible session and re-execute the server binary
    Upgrade,
}

/// A change that command processing can't make itself.
///
/// Handlers only ever hold the session they're running for and a shared
/// reference to the rest of the server state. Anything that touches another
/// session, or the process as a whole, is returned as a `CommandAction` and
/// applied by the server after the handler has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    /// The given connection has authenticated as `user`. Any other session
    /// for the same user must be disconnected.
    Attached { conn: ConnectionId, user: String },

    /// Disconnect the client session belonging to `user`, if there is one
    KillUser { user: String, reason: String },

    /// Send a notice to every attached client
    GlobalNotice(String),

    /// Stop the event loop
    Shutdown(ShutdownAction),
}
