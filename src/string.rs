//! Fallback detection of plausible printable strings.
//!
//! Consulted last by the classifier, after structured introspection fails.
//! Deliberately conservative: a minimum length suppresses false positives
//! on small random byte sequences, and only tab, LF, and CR are accepted
//! among control bytes.

use crate::mem::{wraps, ReadMemory};

/// Bytes copied when probing a candidate string address.
pub const STRING_WINDOW: usize = 500;

/// Shortest run accepted as a plausible string.
pub const MIN_STRING_LEN: usize = 4;

// Continuation-byte counts indexed by the low 6 bits of a lead byte.
//
//   --0xxxxx = 1 (00-1f)
//   --10xxxx = 2 (20-2f)
//   --110xxx = 3 (30-37)
//   --1110xx = 4 (38-3b)
//   --11110x = 5 (3c-3d)
//
// Zero marks an invalid lead byte.
static CONTINUATION_BYTES: [u8; 0x40] = [
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, //
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, //
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, //
    3, 3, 3, 3, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 0, 0, //
];

/// True only for the control bytes a printable string may contain: tab,
/// line feed, carriage return.
pub fn is_allowed_control_byte(b: u8) -> bool {
    matches!(b, 0x09 | 0x0a | 0x0d)
}

/// Scan `buf` for a NUL-terminated UTF-8 run of at least `min_len` bytes.
///
/// A NUL before `min_len` fails; a NUL at or past it succeeds. Lead bytes
/// must carry both high bits, continuation bytes must match `10xxxxxx`, and
/// disallowed control bytes fail. Running off the end of `buf` without a
/// terminator fails.
pub fn is_valid_utf8_run(buf: &[u8], min_len: usize) -> bool {
    let mut i = 0;

    while i < buf.len() {
        let b = buf[i];

        if b == 0 {
            return i >= min_len;
        }

        if b & 0x80 != 0 {
            if b & 0xc0 != 0xc0 {
                return false;
            }
            let continuation = CONTINUATION_BYTES[(b & 0x3f) as usize] as usize;
            if continuation == 0 || i + continuation >= buf.len() {
                return false;
            }
            for _ in 0..continuation {
                i += 1;
                if buf[i] & 0xc0 != 0x80 {
                    return false;
                }
            }
        } else if b < 0x20 && !is_allowed_control_byte(b) {
            return false;
        }

        i += 1;
    }

    false
}

/// Decide whether `addr` plausibly points at a printable string.
///
/// Rejects null and wrapping addresses, requires the full probe window to
/// be readable, then applies [`is_valid_utf8_run`].
pub fn is_plausible_string<M: ReadMemory>(mem: &M, addr: u64) -> bool {
    if addr == 0 || wraps(addr, STRING_WINDOW) {
        return false;
    }

    let mut window = [0u8; STRING_WINDOW];
    if !mem.copy_safely(addr, &mut window) {
        return false;
    }

    is_valid_utf8_run(&window, MIN_STRING_LEN)
}
