//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Request framing
//!
//! Every request starts with a one-byte opcode; the rest of the request is
//! opcode-specific. Multibyte integers are host-order (UNIX domain sockets
//! never cross hosts) unless the `net-order` feature is enabled.
//!
//! ```text
//! GET_ONE     0x01  klen:u32 key
//! GET_N       0x02  klen:u32 key n:u32
//! GET_BETWEEN 0x03  k0len:u32 k0 k1len:u32 k1
//! PUT_ONE     0x04  klen:u32 key vlen:u32 value
//! PUT_MULTI   0x05  (klen:u32 key vlen:u32 value)* 0:u32
//! PUT_BULK    0x06  (klen:u32 key vlen:u32 value)* 0:u32
//! ```
//!
//! ## Status codes
//!
//! - 0x00: OK
//! - 0x01: NOT_FOUND
//! - 0x02: ERR

mod command;
pub mod codec;
mod response;

pub use command::Opcode;
pub use response::Status;
