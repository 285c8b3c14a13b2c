//! Per-request scratch storage
//!
//! Each worker keeps one scratch per payload kind (key, value). Small
//! payloads land in a fixed inline buffer; anything at or above the
//! threshold uses a heap cache that only ever grows, so the allocator is
//! paid once per connection for the largest payload seen rather than once
//! per request.

/// Largest payload served from the inline buffer
///
/// Inline scratch lives inside the worker's stack frame, so this must stay
/// well below the thread stack size.
pub const STACK_SCRATCH_MAX: usize = 16 * 1024;

/// Reusable scratch region for one payload kind
pub struct Scratch {
    inline: [u8; STACK_SCRATCH_MAX],
    heap: Vec<u8>,
}

impl Scratch {
    pub fn new() -> Self {
        Scratch {
            inline: [0u8; STACK_SCRATCH_MAX],
            heap: Vec::new(),
        }
    }

    /// Borrow a zero-initialized-or-stale region of exactly `len` bytes
    ///
    /// Lengths below `STACK_SCRATCH_MAX` reuse the inline buffer; the
    /// boundary and above go to the heap cache, growing it if needed.
    pub fn get(&mut self, len: usize) -> &mut [u8] {
        if len < STACK_SCRATCH_MAX {
            &mut self.inline[..len]
        } else {
            if self.heap.len() < len {
                self.heap.resize(len, 0);
            }
            &mut self.heap[..len]
        }
    }

    /// Current heap cache size
    pub fn heap_capacity(&self) -> usize {
        self.heap.len()
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}
