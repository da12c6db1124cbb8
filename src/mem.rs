//! Bounded, fault-tolerant reads from foreign memory.
//!
//! Every structure this crate inspects lives in the address space of a
//! process that may be mid-crash. Nothing here dereferences a foreign
//! address: all access goes through [`ReadMemory::try_read()`], which copies
//! bytes into a caller-provided local buffer and reports failure as a byte
//! count instead of a fault.

use std::cell::Cell;

/// Largest span attempted in a single readability probe chunk.
pub const READ_CHUNK: usize = 10 * 1024;

/// A non-faulting read primitive over some target address space.
///
/// Implementations must never panic or fault on an unmapped, misaligned, or
/// mid-write address. Partial reads are allowed: the return value is the
/// number of leading bytes successfully copied.
pub trait ReadMemory {
    /// One atomic attempt to copy `buf.len()` bytes from `addr`.
    ///
    /// Returns the number of bytes copied, starting at `addr`. A return of
    /// 0 means the first byte was unreadable.
    fn try_read(&self, addr: u64, buf: &mut [u8]) -> usize;

    /// Copy exactly `buf.len()` bytes from `addr`, or nothing.
    fn copy_safely(&self, addr: u64, buf: &mut [u8]) -> bool {
        self.try_read(addr, buf) == buf.len()
    }

    /// Test whether `len` bytes starting at `addr` can be read.
    ///
    /// Probes in chunks of at most [`READ_CHUNK`] bytes into a fixed stack
    /// scratch buffer. Address-space wraparound is rejected up front.
    fn is_readable(&self, addr: u64, len: usize) -> bool {
        if wraps(addr, len) {
            return false;
        }

        let mut scratch = [0u8; READ_CHUNK];
        let mut offset = 0usize;

        while offset < len {
            let span = READ_CHUNK.min(len - offset);
            if !self.copy_safely(addr + offset as u64, &mut scratch[..span]) {
                return false;
            }
            offset += span;
        }

        true
    }

    /// Copy as many leading bytes of `buf.len()` as are readable at `addr`,
    /// returning the count.
    ///
    /// Locates the readable/unreadable boundary by adaptive binary search:
    /// a 1-byte probe first, then the largest remaining candidate span,
    /// doubling after success (capped at the remainder) and halving after
    /// failure. O(log n) attempts instead of O(n).
    fn copy_max_possible(&self, addr: u64, buf: &mut [u8]) -> usize {
        let len = buf.len();
        if len == 0 || wraps(addr, len) {
            return 0;
        }

        // The 1-byte special case doubles as the initial probe: if the
        // first byte is unreadable there is no boundary to search for.
        if !self.copy_safely(addr, &mut buf[..1]) {
            return 0;
        }
        if len == 1 {
            return 1;
        }

        let mut copied = 0usize;
        let mut attempt = len;

        while copied < len {
            let cursor = match addr.checked_add(copied as u64) {
                Some(cursor) => cursor,
                None => break,
            };
            let end = copied + attempt;
            if self.copy_safely(cursor, &mut buf[copied..end]) {
                copied = end;
                attempt = (attempt * 2).min(len - copied);
            } else {
                if attempt == 1 {
                    break;
                }
                attempt /= 2;
            }
        }

        copied
    }
}

/// True if `addr + len` overflows the address width.
///
/// Checked before every windowed probe: a missed wraparound is the one
/// condition that could compute a wildly invalid address.
pub fn wraps(addr: u64, len: usize) -> bool {
    addr.checked_add(len as u64).is_none()
}

/// In-process memory image backed by plain buffers.
///
/// Lets tests and replay tooling exercise the classifier against simulated
/// foreign memory, including deliberately unmapped holes and partially
/// readable regions. Counts read attempts so tests can assert how much
/// probing a query performed.
#[derive(Clone, Debug, Default)]
pub struct SimulatedMemory {
    regions: Vec<(u64, Vec<u8>)>,
    probes: Cell<usize>,
}

impl SimulatedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `bytes` at `addr`. Regions must not overlap.
    pub fn map(&mut self, addr: u64, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        self.regions.push((addr, bytes));
        self.regions.sort_by_key(|(base, _)| *base);
    }

    /// Number of `try_read` attempts made so far.
    pub fn probe_count(&self) -> usize {
        self.probes.get()
    }

    pub fn reset_probe_count(&self) {
        self.probes.set(0);
    }

    // Longest contiguous readable run starting at `addr`, clipped to `len`.
    fn readable_run(&self, addr: u64, len: usize) -> Option<(usize, &[u8])> {
        for (base, bytes) in &self.regions {
            let end = base + bytes.len() as u64;
            if addr >= *base && addr < end {
                let start = (addr - base) as usize;
                let avail = bytes.len() - start;
                let run = avail.min(len);
                return Some((run, &bytes[start..start + run]));
            }
        }
        None
    }
}

impl ReadMemory for SimulatedMemory {
    fn try_read(&self, addr: u64, buf: &mut [u8]) -> usize {
        self.probes.set(self.probes.get() + 1);

        match self.readable_run(addr, buf.len()) {
            Some((run, bytes)) => {
                buf[..run].copy_from_slice(bytes);
                run
            }
            None => 0,
        }
    }
}
