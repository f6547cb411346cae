//! Client protocol listeners, and the connections they accept.
//!
//! Each accepted socket is driven by its own task, which frames inbound bytes
//! into protocol lines and writes outbound lines in order. The owning process
//! talks to a connection through a [`Connection`] handle; events arrive on the
//! channel given to the [`ListenerCollection`].
//!
//! Clear-text connections can be detached from their task with
//! [`Connection::freeze`], which hands back the raw socket descriptor with
//! close-on-exec cleared so that it survives an `exec` of the process. The new
//! process picks it up again with [`ListenerCollection::restore_connection`].

pub mod id;
pub use id::*;

pub mod error;
pub use error::*;

mod protocols;
pub use protocols::*;

mod connection;
pub use connection::*;

mod framing;
pub use framing::*;

mod listener_collection;
pub use listener_collection::*;

mod internal {
    pub mod client_verifier;
    pub mod connection_task;
    pub use connection_task::*;
    pub mod listener;
    pub use listener::*;
}
