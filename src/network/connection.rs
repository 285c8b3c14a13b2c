//! Connection Handler
//!
//! Per-connection request loop: read an opcode, run its handler, reply,
//! repeat until the peer disconnects or a fatal error tears the connection
//! down. One handler instance is exclusively owned by one worker thread;
//! the only shared state it touches is the storage engine.
//!
//! ## Failure rules
//!
//! - Point-get miss: `NOT_FOUND` reply, connection stays healthy.
//! - Engine error: reported to the client (`ERR`); PUT_MULTI logs and
//!   keeps consuming instead. Connection stays healthy.
//! - I/O failure, timeout, shutdown, unknown opcode, oversized length:
//!   fatal; the loop exits and the worker closes the socket.

use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{HearthError, Result};
use crate::protocol::codec;
use crate::protocol::{Opcode, Status};
use crate::scratch::Scratch;
use crate::storage::Store;

use super::BufferedSocket;

/// Handles a single client connection
pub struct Connection {
    sock: BufferedSocket,
    store: Arc<Store>,

    /// Reusable payload staging, one per payload kind. GET_BETWEEN borrows
    /// both at once (range start in `key_scratch`, range end in
    /// `val_scratch`).
    key_scratch: Scratch,
    val_scratch: Scratch,

    shutdown: Arc<AtomicBool>,
    timeout: Duration,
    max_payload: usize,
    id: u64,
}

impl Connection {
    /// Create a handler for an accepted stream
    pub fn new(
        stream: UnixStream,
        store: Arc<Store>,
        shutdown: Arc<AtomicBool>,
        config: &Config,
        id: u64,
    ) -> Result<Self> {
        let sock = BufferedSocket::new(stream, Arc::clone(&shutdown))?;
        Ok(Connection {
            sock,
            store,
            key_scratch: Scratch::new(),
            val_scratch: Scratch::new(),
            shutdown,
            timeout: Duration::from_millis(config.io_timeout_ms),
            max_payload: config.max_payload_size,
            id,
        })
    }

    /// Run the request loop until the peer closes or a fatal error
    ///
    /// A peer close at the opcode boundary is a clean disconnect and
    /// returns `Ok`; everything else propagates and the caller closes the
    /// socket by dropping this handler.
    pub fn handle(&mut self) -> Result<()> {
        loop {
            let mut op = [0u8; 1];
            match self.sock.read_exact(&mut op, self.timeout) {
                Ok(()) => {}
                Err(HearthError::PeerClosed) => return Ok(()),
                Err(e) => return Err(e),
            }

            // Readiness waits re-check this flag too, but a request served
            // entirely from staged bytes never waits.
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(HearthError::Shutdown);
            }

            let opcode = Opcode::try_from(op[0])?;
            tracing::trace!(conn = self.id, opcode = ?opcode, "dispatching request");

            match opcode {
                Opcode::GetOne => self.get_one()?,
                Opcode::GetN => self.get_n()?,
                Opcode::GetBetween => self.get_between()?,
                Opcode::PutOne => self.put_one()?,
                Opcode::PutMulti => self.put_multi()?,
                Opcode::PutBulk => self.put_bulk()?,
            }
        }
    }

    // -------------------------------------------------------------------------
    // Handlers
    // -------------------------------------------------------------------------

    /// GET_ONE: `klen key` -> `OK vlen value` | `NOT_FOUND` | `ERR mlen msg`
    fn get_one(&mut self) -> Result<()> {
        let klen = self.read_len()?;
        let key = self.key_scratch.get(klen);
        self.sock.read_exact(key, self.timeout)?;

        match self.store.get(key) {
            Ok(Some(value)) => {
                let value: &[u8] = &value;
                let vlen = codec::encode_u32(value.len() as u32);
                self.sock
                    .write_gather(&[&[Status::Ok as u8], &vlen, value], self.timeout)
            }
            Ok(None) => self
                .sock
                .write_exact(&[Status::NotFound as u8], self.timeout),
            Err(e) => {
                tracing::warn!(conn = self.id, error = %e, "point get failed");
                send_error(&mut self.sock, &e.to_string(), self.timeout)
            }
        }
    }

    /// GET_N: `klen key n` -> up to n of `OK klen key vlen value`, then an
    /// `ERR mlen msg` record if the iterator ran out early (message empty
    /// when the engine reported no error). No terminator after n entries;
    /// clients count.
    fn get_n(&mut self) -> Result<()> {
        let klen = self.read_len()?;
        let key = self.key_scratch.get(klen);
        self.sock.read_exact(key, self.timeout)?;

        let mut nbuf = [0u8; 4];
        self.sock.read_exact(&mut nbuf, self.timeout)?;
        let wanted = codec::decode_u32(nbuf);

        let mut iter = self.store.scan_iterator();
        iter.seek(&*key);

        let mut emitted = 0u32;
        while emitted < wanted {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(HearthError::Shutdown);
            }
            if !iter.valid() {
                let msg = match iter.status() {
                    Ok(()) => String::new(),
                    Err(e) => e.into_string(),
                };
                send_error(&mut self.sock, &msg, self.timeout)?;
                return Ok(());
            }

            // valid() guarantees both views exist
            let entry_key = iter.key().unwrap_or_default();
            let entry_value = iter.value().unwrap_or_default();
            let klen = codec::encode_u32(entry_key.len() as u32);
            let vlen = codec::encode_u32(entry_value.len() as u32);
            self.sock.write_gather(
                &[&[Status::Ok as u8], &klen, entry_key, &vlen, entry_value],
                self.timeout,
            )?;

            iter.next();
            emitted += 1;
        }
        Ok(())
    }

    /// GET_BETWEEN: `k0len k0 k1len k1` -> `OK klen key vlen value` for
    /// every stored key in [k0, k1], then the `OK 0 0` terminator
    fn get_between(&mut self) -> Result<()> {
        let k0len = self.read_len()?;
        let k0 = self.key_scratch.get(k0len);
        self.sock.read_exact(k0, self.timeout)?;

        let mut lbuf = [0u8; 4];
        self.sock.read_exact(&mut lbuf, self.timeout)?;
        let k1len = check_len(codec::decode_u32(lbuf), self.max_payload)?;
        let k1 = self.val_scratch.get(k1len);
        self.sock.read_exact(k1, self.timeout)?;

        let mut iter = self.store.scan_iterator();
        iter.seek(&*k0);

        while iter.valid() {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(HearthError::Shutdown);
            }
            let entry_key = iter.key().unwrap_or_default();
            if entry_key > &*k1 {
                break;
            }
            let entry_value = iter.value().unwrap_or_default();
            let klen = codec::encode_u32(entry_key.len() as u32);
            let vlen = codec::encode_u32(entry_value.len() as u32);
            self.sock.write_gather(
                &[&[Status::Ok as u8], &klen, entry_key, &vlen, entry_value],
                self.timeout,
            )?;
            iter.next();
        }

        if let Err(e) = iter.status() {
            tracing::warn!(conn = self.id, error = %e, "range scan ended with engine error");
        }

        // End-of-stream: zero-length key and zero-length value.
        let zero = codec::encode_u32(0);
        self.sock
            .write_gather(&[&[Status::Ok as u8], &zero, &zero], self.timeout)
    }

    /// PUT_ONE: `klen key vlen value` -> `OK 0x00` | `ERR 0x00`
    fn put_one(&mut self) -> Result<()> {
        let klen = self.read_len()?;
        let key = self.key_scratch.get(klen);
        self.sock.read_exact(key, self.timeout)?;

        let mut lbuf = [0u8; 4];
        self.sock.read_exact(&mut lbuf, self.timeout)?;
        let vlen = check_len(codec::decode_u32(lbuf), self.max_payload)?;
        let value = self.val_scratch.get(vlen);
        self.sock.read_exact(value, self.timeout)?;

        match self.store.put(key, value) {
            Ok(()) => self
                .sock
                .write_exact(&[Status::Ok as u8, 0x00], self.timeout),
            Err(e) => {
                tracing::warn!(conn = self.id, error = %e, "single put failed");
                self.sock
                    .write_exact(&[Status::Err as u8, 0x00], self.timeout)
            }
        }
    }

    /// PUT_MULTI: a stream of `klen key vlen value` records ended by
    /// `klen = 0` -> single `OK` byte after the terminator
    ///
    /// Engine errors are logged and the stream keeps going; writes apply
    /// in the order the client sent them.
    fn put_multi(&mut self) -> Result<()> {
        loop {
            // A steady stream never blocks on I/O, so the flag has to be
            // observed here, before each write.
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(HearthError::Shutdown);
            }
            let mut lbuf = [0u8; 4];
            self.sock.read_exact(&mut lbuf, self.timeout)?;
            let klen = check_len(codec::decode_u32(lbuf), self.max_payload)?;
            if klen == 0 {
                break;
            }
            let key = self.key_scratch.get(klen);
            self.sock.read_exact(key, self.timeout)?;

            self.sock.read_exact(&mut lbuf, self.timeout)?;
            let vlen = check_len(codec::decode_u32(lbuf), self.max_payload)?;
            let value = self.val_scratch.get(vlen);
            self.sock.read_exact(value, self.timeout)?;

            if let Err(e) = self.store.put(key, value) {
                tracing::warn!(conn = self.id, error = %e, "streamed put failed, continuing");
            }
        }
        self.sock.write_exact(&[Status::Ok as u8], self.timeout)
    }

    /// PUT_BULK: same stream format as PUT_MULTI, but records build a
    /// sorted table file that is ingested atomically after the terminator
    /// -> `OK` | `ERR mlen msg`
    ///
    /// On a writer error (out-of-order key, engine failure) the rest of
    /// the stream is still consumed and discarded so the connection stays
    /// in sync, then the error is reported and the file removed.
    fn put_bulk(&mut self) -> Result<()> {
        let (mut bulk, mut failure) = match self.store.bulk_load() {
            Ok(b) => (Some(b), None),
            Err(e) => (None, Some(e.to_string())),
        };

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(HearthError::Shutdown);
            }
            let mut lbuf = [0u8; 4];
            self.sock.read_exact(&mut lbuf, self.timeout)?;
            let klen = check_len(codec::decode_u32(lbuf), self.max_payload)?;
            if klen == 0 {
                break;
            }
            let key = self.key_scratch.get(klen);
            self.sock.read_exact(key, self.timeout)?;

            self.sock.read_exact(&mut lbuf, self.timeout)?;
            let vlen = check_len(codec::decode_u32(lbuf), self.max_payload)?;
            let value = self.val_scratch.get(vlen);
            self.sock.read_exact(value, self.timeout)?;

            if failure.is_none() {
                if let Some(b) = bulk.as_mut() {
                    if let Err(e) = b.add(key, value) {
                        failure = Some(e.to_string());
                    }
                }
            }
        }

        let outcome = match (bulk, failure) {
            (Some(b), None) => b.finish().err().map(|e| e.to_string()),
            (Some(b), Some(msg)) => {
                b.discard();
                Some(msg)
            }
            (None, msg) => msg,
        };

        match outcome {
            None => self.sock.write_exact(&[Status::Ok as u8], self.timeout),
            Some(msg) => {
                tracing::warn!(conn = self.id, error = %msg, "bulk load failed");
                send_error(&mut self.sock, &msg, self.timeout)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Wire helpers
    // -------------------------------------------------------------------------

    /// Read a `u32` length and validate it against the configured ceiling
    fn read_len(&mut self) -> Result<usize> {
        let mut lbuf = [0u8; 4];
        self.sock.read_exact(&mut lbuf, self.timeout)?;
        check_len(codec::decode_u32(lbuf), self.max_payload)
    }
}

/// Reject lengths beyond the configured ceiling before any allocation
fn check_len(len: u32, max: usize) -> Result<usize> {
    let len = len as usize;
    if len > max {
        return Err(HearthError::Protocol(format!(
            "length {len} exceeds configured maximum {max}"
        )));
    }
    Ok(len)
}

/// Emit an `ERR, u16 mlen, bytes` record, truncating oversized messages
fn send_error(sock: &mut BufferedSocket, msg: &str, timeout: Duration) -> Result<()> {
    let bytes = msg.as_bytes();
    let bytes = &bytes[..bytes.len().min(u16::MAX as usize)];
    let mlen = codec::encode_u16(bytes.len() as u16);
    sock.write_gather(&[&[Status::Err as u8], &mlen, bytes], timeout)
}
