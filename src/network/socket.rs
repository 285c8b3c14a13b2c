//! Buffered socket
//!
//! Exact-count reads and writes over a non-blocking UNIX stream socket.
//! Inbound bytes are staged through a ring buffer so short reads never lose
//! data between requests; outbound writes are unbuffered, either a single
//! write or one gathered write over discontiguous segments.
//!
//! All waits go through `poll(2)` with the caller's deadline, sliced so the
//! process-wide shutdown flag is observed at every readiness wakeup.

use std::io::{self, IoSlice, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

use crate::buffer::RingBuffer;
use crate::error::{HearthError, Result};

/// Initial inbound ring capacity; also the socket read chunk ceiling
const INBOUND_CAPACITY: usize = 16 * 1024;

/// Longest single poll sleep, so shutdown is noticed promptly
const POLL_SLICE: Duration = Duration::from_millis(100);

/// A connection's socket plus inbound staging
pub struct BufferedSocket {
    stream: UnixStream,
    inbound: RingBuffer,
    shutdown: Arc<AtomicBool>,
}

impl BufferedSocket {
    /// Take ownership of an accepted stream, switching it to non-blocking
    pub fn new(stream: UnixStream, shutdown: Arc<AtomicBool>) -> Result<Self> {
        stream
            .set_nonblocking(true)
            .map_err(|e| HearthError::Socket(format!("set_nonblocking: {e}")))?;
        Ok(BufferedSocket {
            stream,
            inbound: RingBuffer::with_capacity(INBOUND_CAPACITY),
            shutdown,
        })
    }

    /// Read exactly `dst.len()` bytes, staging through the ring buffer
    ///
    /// Buffered bytes are consumed first; the socket is then read in chunks
    /// no larger than the ring accepts without growing. The deadline is
    /// re-armed whenever a chunk arrives, so `Timeout` means no progress
    /// for the full timeout. Fails with `PeerClosed` on EOF, `Shutdown`
    /// when the flag is observed, `Socket` on a fatal errno.
    pub fn read_exact(&mut self, dst: &mut [u8], timeout: Duration) -> Result<()> {
        let mut filled = self.inbound.pop_n(dst);
        if filled == dst.len() {
            return Ok(());
        }

        let mut chunk = [0u8; INBOUND_CAPACITY];
        let mut deadline = Instant::now() + timeout;
        while filled < dst.len() {
            let want = self.inbound.available_without_grow().min(chunk.len());
            match self.stream.read(&mut chunk[..want]) {
                Ok(0) => return Err(HearthError::PeerClosed),
                Ok(n) => {
                    self.inbound.push_n(&chunk[..n]);
                    filled += self.inbound.pop_n(&mut dst[filled..]);
                    deadline = Instant::now() + timeout;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait(PollFlags::POLLIN, deadline)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(fatal(e)),
            }
        }
        Ok(())
    }

    /// Write exactly `src.len()` bytes
    pub fn write_exact(&mut self, src: &[u8], timeout: Duration) -> Result<()> {
        let mut written = 0;
        let mut deadline = Instant::now() + timeout;
        while written < src.len() {
            match self.stream.write(&src[written..]) {
                Ok(0) => return Err(HearthError::Socket("write returned zero".to_string())),
                Ok(n) => {
                    written += n;
                    deadline = Instant::now() + timeout;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait(PollFlags::POLLOUT, deadline)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(fatal(e)),
            }
        }
        Ok(())
    }

    /// Write a short vector of discontiguous segments as one logical write
    ///
    /// Uses a gathered write per attempt; on a short write the segment
    /// cursor advances rather than restarting from the first segment.
    /// Byte-equivalent to concatenating the segments into `write_exact`.
    pub fn write_gather(&mut self, segments: &[&[u8]], timeout: Duration) -> Result<()> {
        let total: usize = segments.iter().map(|s| s.len()).sum();
        let mut written = 0;
        let mut seg = 0;
        let mut off = 0;
        let mut deadline = Instant::now() + timeout;
        let mut iov: Vec<IoSlice<'_>> = Vec::with_capacity(segments.len());

        while written < total {
            while off == segments[seg].len() {
                seg += 1;
                off = 0;
            }
            iov.clear();
            iov.push(IoSlice::new(&segments[seg][off..]));
            for s in &segments[seg + 1..] {
                if !s.is_empty() {
                    iov.push(IoSlice::new(s));
                }
            }

            match self.stream.write_vectored(&iov) {
                Ok(0) => return Err(HearthError::Socket("write returned zero".to_string())),
                Ok(n) => {
                    written += n;
                    let mut advance = n;
                    while advance > 0 {
                        let remaining = segments[seg].len() - off;
                        if advance >= remaining {
                            advance -= remaining;
                            seg += 1;
                            off = 0;
                        } else {
                            off += advance;
                            advance = 0;
                        }
                    }
                    deadline = Instant::now() + timeout;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait(PollFlags::POLLOUT, deadline)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(fatal(e)),
            }
        }
        Ok(())
    }

    /// Wait for readiness, observing the shutdown flag at every wakeup
    ///
    /// Polls in short slices so a shutdown is noticed even while the peer
    /// is silent. `Timeout` only once the caller's deadline has passed.
    fn wait(&self, events: PollFlags, deadline: Instant) -> Result<()> {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(HearthError::Shutdown);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HearthError::Timeout);
            }
            let slice = remaining.min(POLL_SLICE);
            let millis = (slice.as_millis() as i32).max(1);

            let mut fds = [PollFd::new(self.stream.as_raw_fd(), events)];
            match poll(&mut fds, millis) {
                Ok(0) => continue, // slice expired; recheck flag and deadline
                Ok(_) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        return Err(HearthError::Shutdown);
                    }
                    return Ok(());
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(HearthError::Socket(format!("poll: {e}"))),
            }
        }
    }
}

/// Classify a non-transient socket error
///
/// Transient kinds (EAGAIN/EWOULDBLOCK/EINTR) are handled in the retry
/// loops; everything that reaches here tears the connection down.
fn fatal(err: io::Error) -> HearthError {
    HearthError::Socket(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn pair() -> (BufferedSocket, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));
        (BufferedSocket::new(a, shutdown).unwrap(), b)
    }

    #[test]
    fn test_read_exact_single_write() {
        let (mut sock, mut peer) = pair();
        peer.write_all(b"hello").unwrap();

        let mut buf = [0u8; 5];
        sock.read_exact(&mut buf, TIMEOUT).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_read_exact_across_partial_writes() {
        let (mut sock, mut peer) = pair();
        let writer = thread::spawn(move || {
            peer.write_all(b"abc").unwrap();
            thread::sleep(Duration::from_millis(50));
            peer.write_all(b"defgh").unwrap();
            peer
        });

        let mut buf = [0u8; 8];
        sock.read_exact(&mut buf, TIMEOUT).unwrap();
        assert_eq!(&buf, b"abcdefgh");
        writer.join().unwrap();
    }

    #[test]
    fn test_read_exact_serves_staged_bytes() {
        let (mut sock, mut peer) = pair();
        peer.write_all(b"0123456789").unwrap();
        drop(peer);

        // The first read stages everything available; the second must be
        // served entirely from the ring even though the peer is gone.
        let mut head = [0u8; 2];
        sock.read_exact(&mut head, TIMEOUT).unwrap();
        assert_eq!(&head, b"01");

        let mut tail = [0u8; 8];
        sock.read_exact(&mut tail, TIMEOUT).unwrap();
        assert_eq!(&tail, b"23456789");
    }

    #[test]
    fn test_read_exact_peer_close() {
        let (mut sock, mut peer) = pair();
        peer.write_all(b"ab").unwrap();
        drop(peer);

        let mut buf = [0u8; 4];
        match sock.read_exact(&mut buf, TIMEOUT) {
            Err(HearthError::PeerClosed) => {}
            other => panic!("expected PeerClosed, got {other:?}"),
        }
    }

    #[test]
    fn test_read_exact_timeout() {
        let (mut sock, _peer) = pair();
        let mut buf = [0u8; 1];
        match sock.read_exact(&mut buf, Duration::from_millis(120)) {
            Err(HearthError::Timeout) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_shutdown_observed_at_wakeup() {
        let (a, _peer) = UnixStream::pair().unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut sock = BufferedSocket::new(a, Arc::clone(&shutdown)).unwrap();
        shutdown.store(true, Ordering::Relaxed);

        let mut buf = [0u8; 1];
        match sock.read_exact(&mut buf, TIMEOUT) {
            Err(HearthError::Shutdown) => {}
            other => panic!("expected Shutdown, got {other:?}"),
        }
    }

    #[test]
    fn test_write_exact() {
        let (mut sock, mut peer) = pair();
        sock.write_exact(b"payload", TIMEOUT).unwrap();

        let mut buf = [0u8; 7];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"payload");
    }

    #[test]
    fn test_write_gather_matches_concatenation() {
        let (mut sock, mut peer) = pair();
        let segments: [&[u8]; 5] = [b"\x00", b"\x03\x00\x00\x00", b"key", b"", b"value"];
        sock.write_gather(&segments, TIMEOUT).unwrap();
        drop(sock);

        let mut buf = Vec::new();
        peer.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"\x00\x03\x00\x00\x00keyvalue");
    }

    #[test]
    fn test_write_gather_all_empty() {
        let (mut sock, mut peer) = pair();
        let segments: [&[u8]; 2] = [b"", b""];
        sock.write_gather(&segments, TIMEOUT).unwrap();
        drop(sock);

        let mut buf = Vec::new();
        peer.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_large_transfer_round_trip() {
        let (mut sock, mut peer) = pair();
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let writer = thread::spawn(move || {
            peer.write_all(&payload).unwrap();
            peer
        });

        let mut buf = vec![0u8; expected.len()];
        sock.read_exact(&mut buf, Duration::from_secs(5)).unwrap();
        assert_eq!(buf, expected);
        writer.join().unwrap();
    }
}
