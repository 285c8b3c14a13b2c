//! # HearthKV
//!
//! A single-host embedded key-value server:
//! - Ordered storage engine (RocksDB) shared across all connections
//! - Binary opcoded protocol over a UNIX domain stream socket
//! - Non-blocking buffered socket I/O with backpressure and timeouts
//! - Streamed multi-writes and bulk ingestion of sorted table files
//!
//! ## Data Flow
//!
//! ```text
//! socket bytes ─▶ BufferedSocket ─▶ codec ─▶ handler ─▶ Store (RocksDB)
//!                                                          │
//! socket bytes ◀─ BufferedSocket ◀─ codec ◀────────────────┘
//! ```
//!
//! The acceptor spawns a bounded worker pool; each accepted connection is
//! owned by exactly one worker for its whole life.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod buffer;
pub mod config;
pub mod error;

pub mod network;
pub mod protocol;
pub mod scratch;
pub mod storage;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use error::{HearthError, Result};
pub use network::Server;
pub use storage::Store;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of HearthKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
