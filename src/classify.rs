//! The notability decision: is a candidate address worth reporting, and
//! how should it be described?
//!
//! [`Classifier`] is the public entry point. It composes the tagged-pointer
//! decoder (first, it touches no memory), the zombie cache, the class-chain
//! walker, and last the string heuristic. Every sub-check is total and
//! non-faulting, so a corrupted candidate only ever costs a false negative.

use std::fmt::{self, Write};
use std::str;

use crate::abi::{ChainWalker, Classification, ObjcLayout};
use crate::error::{Error, Result};
use crate::mem::ReadMemory;
use crate::string::{self, STRING_WINDOW};
use crate::tagged::{TaggedKind, TaggedLayout};
use crate::zombie::ZombieCache;

/// The read-only capability value holding every architecture-dependent
/// constant the classifier needs. Chosen at startup, never global.
#[derive(Clone, Copy, Debug)]
pub struct Runtime {
    pub tagged: TaggedLayout,
    pub objc: ObjcLayout,
}

impl Runtime {
    pub const fn x86_64() -> Self {
        Self {
            tagged: TaggedLayout::x86_64(),
            objc: ObjcLayout::x86_64(),
        }
    }

    pub const fn arm64() -> Self {
        Self {
            tagged: TaggedLayout::arm64(),
            objc: ObjcLayout::arm64(),
        }
    }
}

/// Result of formatting a description into a caller buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Description {
    /// Bytes written.
    pub len: usize,
    /// Whether the formatted text did not fit and was cut short.
    pub truncated: bool,
}

/// Per-candidate output: the notability decision plus its description.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Verdict {
    pub notable: bool,
    pub len: usize,
    pub truncated: bool,
}

/// Length-checked formatter over a caller-provided byte buffer.
///
/// Never overflows its destination; overlong output is cut and flagged.
pub struct BoundedWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    truncated: bool,
}

impl<'a> BoundedWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            truncated: false,
        }
    }

    pub fn finish(self) -> Description {
        Description {
            len: self.len,
            truncated: self.truncated,
        }
    }
}

impl fmt::Write for BoundedWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let avail = self.buf.len() - self.len;

        if bytes.len() <= avail {
            self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
            self.len += bytes.len();
        } else {
            self.buf[self.len..].copy_from_slice(&bytes[..avail]);
            self.len = self.buf.len();
            self.truncated = true;
        }

        Ok(())
    }
}

/// Classifies candidate addresses from a faulted (or inspected) process.
///
/// Holds only borrows and plain values: no allocation, locking, or
/// non-reentrant calls happen on any query path, so queries are safe from a
/// crash-handling context.
pub struct Classifier<'a, M: ReadMemory> {
    mem: &'a M,
    runtime: Runtime,
    zombies: Option<ZombieCache<'a>>,
}

impl<'a, M: ReadMemory> Classifier<'a, M> {
    pub fn new(mem: &'a M, runtime: Runtime) -> Self {
        Self {
            mem,
            runtime,
            zombies: None,
        }
    }

    /// Consult an externally owned zombie cache before structured probing.
    pub fn with_zombie_cache(mut self, cache: ZombieCache<'a>) -> Self {
        self.zombies = Some(cache);
        self
    }

    fn walker(&self) -> ChainWalker<'_, M> {
        ChainWalker::new(self.mem, self.runtime.objc, self.runtime.tagged)
    }

    /// Decide whether `addr` plausibly refers to something recognizable.
    ///
    /// False for null and for tagged-shaped words that fail tag validity.
    /// Otherwise true if the zombie cache hits, the class walker recognizes
    /// the address, or the string heuristic accepts it. Tuned for safety
    /// over recall: a miss means the address is simply left out of the
    /// report.
    pub fn is_notable(&self, addr: u64) -> bool {
        if addr == 0 {
            return false;
        }

        let tagged = &self.runtime.tagged;
        if tagged.is_tagged(addr) {
            return tagged.is_valid_tagged(addr);
        }

        if let Some(cache) = &self.zombies {
            if cache.lookup(addr).is_some() {
                return true;
            }
        }

        if self.walker().classify(addr) != Classification::Unknown {
            return true;
        }

        string::is_plausible_string(self.mem, addr)
    }

    /// Format a bounded description of `addr` into `out`.
    ///
    /// Recognized kinds format as `"<Name: 0xADDR>"`, with the decoded
    /// value appended for inline numbers and dates; strings emit their
    /// characters directly. Unrecognized addresses produce empty output.
    pub fn describe(&self, addr: u64, out: &mut [u8]) -> Description {
        let mut writer = BoundedWriter::new(out);
        self.write_description(addr, &mut writer);
        writer.finish()
    }

    /// Like [`describe`](Self::describe), surfacing truncation as an error.
    pub fn describe_str<'b>(&self, addr: u64, out: &'b mut [u8]) -> Result<&'b str> {
        let description = self.describe(addr, out);
        if description.truncated {
            return Err(Error::FormatTruncated);
        }

        // `BoundedWriter` only ever copies whole `str` fragments when not
        // truncating, so this cannot lose bytes.
        Ok(str::from_utf8(&out[..description.len]).unwrap_or(""))
    }

    /// The full per-candidate output pair for report embedding.
    pub fn evaluate(&self, addr: u64, out: &mut [u8]) -> Verdict {
        let notable = self.is_notable(addr);
        let description = if notable {
            self.describe(addr, out)
        } else {
            Description {
                len: 0,
                truncated: false,
            }
        };

        Verdict {
            notable,
            len: description.len,
            truncated: description.truncated,
        }
    }

    fn write_description(&self, addr: u64, w: &mut BoundedWriter<'_>) {
        if addr == 0 {
            return;
        }

        let tagged = &self.runtime.tagged;
        if tagged.is_tagged(addr) {
            if let Ok(slot) = tagged.slot_entry(addr) {
                match slot.kind {
                    TaggedKind::String => {
                        let mut buf = [0u8; 12];
                        let len = tagged.decode_string(addr, &mut buf);
                        write_bytes_lossy(w, &buf[..len]);
                    }
                    TaggedKind::Number => {
                        let _ = write!(
                            w,
                            "<{}: {:#x}>: {}",
                            slot.name,
                            addr,
                            tagged.decode_number(addr)
                        );
                    }
                    TaggedKind::Date => {
                        let _ = write!(
                            w,
                            "<{}: {:#x}>: {}",
                            slot.name,
                            addr,
                            tagged.decode_date(addr)
                        );
                    }
                    _ => {
                        let _ = write!(w, "<{}: {:#x}>", slot.name, addr);
                    }
                }
            }
            return;
        }

        if let Some(cache) = &self.zombies {
            if let Some(entry) = cache.lookup(addr) {
                let _ = w.write_str("<");
                write_bytes_lossy(w, entry.name());
                let _ = write!(w, ": {:#x}>", addr);
                return;
            }
        }

        let walker = self.walker();
        match walker.classify(addr) {
            Classification::Class => {
                self.write_named(addr, addr, &walker, w);
            }
            Classification::Object | Classification::Block => {
                if let Ok(class) = walker.class_pointer_of(addr) {
                    self.write_named(addr, class, &walker, w);
                }
            }
            Classification::Unknown => {
                self.write_plausible_string(addr, w);
            }
        }
    }

    // "<ClassName: 0xADDR>" for a heap object or class.
    fn write_named(
        &self,
        addr: u64,
        class_addr: u64,
        walker: &ChainWalker<'_, M>,
        w: &mut BoundedWriter<'_>,
    ) {
        let mut name = [0u8; crate::abi::MAX_NAME_LEN];
        if let Ok(len) = walker.copy_class_name(class_addr, &mut name) {
            let _ = w.write_str("<");
            write_bytes_lossy(w, &name[..len]);
            let _ = write!(w, ": {:#x}>", addr);
        }
    }

    fn write_plausible_string(&self, addr: u64, w: &mut BoundedWriter<'_>) {
        if !string::is_plausible_string(self.mem, addr) {
            return;
        }

        let mut window = [0u8; STRING_WINDOW];
        if !self.mem.copy_safely(addr, &mut window) {
            return;
        }

        let nul = window
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(STRING_WINDOW);
        write_bytes_lossy(w, &window[..nul]);
    }
}

// The heuristic accepts some byte runs that strict UTF-8 decoding refuses
// (overlong forms). Emit only the longest decodable prefix.
fn write_bytes_lossy(w: &mut BoundedWriter<'_>, bytes: &[u8]) {
    let text = match str::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            let valid = err.valid_up_to();
            str::from_utf8(&bytes[..valid]).unwrap_or("")
        }
    };
    let _ = w.write_str(text);
}
