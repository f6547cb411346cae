//! Reverse DNS lookups for newly connected clients.
//!
//! Each lookup races against a timer. Whichever finishes first writes the
//! single completion slot of its [`PendingResolution`] and reports a
//! [`DnsResult`] on the event channel; the loser finds the slot already
//! filled and reports nothing. Dropping the `PendingResolution` cancels both.

mod event;
pub use event::*;

mod error;
pub use error::*;

mod resolver;
pub use resolver::*;

mod dns_client;
pub use crate::dns_client::*;
