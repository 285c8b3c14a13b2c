//! Network Module
//!
//! UNIX domain socket server and per-connection handling.
//!
//! ## Architecture
//!
//! The acceptor runs on the main thread and hands each accepted stream to
//! a pool of worker threads over a bounded channel. A worker wraps the
//! stream in a `BufferedSocket` (non-blocking I/O, ring-buffered inbound
//! staging) and runs the `Connection` request loop until the peer
//! disconnects or a fatal error occurs.

mod connection;
mod server;
mod socket;

pub use connection::Connection;
pub use server::Server;
pub use socket::BufferedSocket;
