//! Protocol codec
//!
//! Encoding and decoding of the fixed wire primitives: `u8`, `u16`, `u32`,
//! raw bytes, and `lp32_bytes` (a `u32` length followed by that many bytes).
//!
//! Multibyte integers travel in host byte order: the transport is a UNIX
//! domain socket, so both ends share one host. Every integer still passes
//! through the `to_net*`/`from_net*` hooks, so building with the
//! `net-order` feature flips the whole wire to big-endian in one place.

use crate::error::{HearthError, Result};

/// Convert a host-order `u16` to its wire representation
#[inline]
pub fn to_net16(value: u16) -> u16 {
    if cfg!(feature = "net-order") {
        value.to_be()
    } else {
        value
    }
}

/// Convert a wire `u16` back to host order
#[inline]
pub fn from_net16(value: u16) -> u16 {
    if cfg!(feature = "net-order") {
        u16::from_be(value)
    } else {
        value
    }
}

/// Convert a host-order `u32` to its wire representation
#[inline]
pub fn to_net32(value: u32) -> u32 {
    if cfg!(feature = "net-order") {
        value.to_be()
    } else {
        value
    }
}

/// Convert a wire `u32` back to host order
#[inline]
pub fn from_net32(value: u32) -> u32 {
    if cfg!(feature = "net-order") {
        u32::from_be(value)
    } else {
        value
    }
}

/// Encode a `u16` into its wire bytes
#[inline]
pub fn encode_u16(value: u16) -> [u8; 2] {
    to_net16(value).to_ne_bytes()
}

/// Decode a `u16` from its wire bytes
#[inline]
pub fn decode_u16(bytes: [u8; 2]) -> u16 {
    from_net16(u16::from_ne_bytes(bytes))
}

/// Encode a `u32` into its wire bytes
#[inline]
pub fn encode_u32(value: u32) -> [u8; 4] {
    to_net32(value).to_ne_bytes()
}

/// Decode a `u32` from its wire bytes
#[inline]
pub fn decode_u32(bytes: [u8; 4]) -> u32 {
    from_net32(u32::from_ne_bytes(bytes))
}

/// Encode a length-prefixed byte string (`lp32_bytes`)
pub fn encode_lp32(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&encode_u32(payload.len() as u32));
    out.extend_from_slice(payload);
    out
}

/// Decode a length-prefixed byte string from the front of `bytes`
///
/// Returns the payload and the total number of bytes consumed.
pub fn decode_lp32(bytes: &[u8]) -> Result<(&[u8], usize)> {
    if bytes.len() < 4 {
        return Err(HearthError::Protocol(format!(
            "truncated lp32 length: {} bytes",
            bytes.len()
        )));
    }
    let len = decode_u32([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() < 4 + len {
        return Err(HearthError::Protocol(format!(
            "truncated lp32 payload: expected {} bytes, got {}",
            len,
            bytes.len() - 4
        )));
    }
    Ok((&bytes[4..4 + len], 4 + len))
}
