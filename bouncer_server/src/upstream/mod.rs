//! A minimal upstream IRC connection, and the cache it maintains.

mod tracker;
pub use tracker::*;

mod connection;
pub use connection::*;
