//! Detection and decoding of pointer-inlined values.
//!
//! A tagged pointer is a pointer-sized word whose bits encode a small
//! immutable value directly, instead of naming a heap address. The bit
//! layout is architecture-specific, so it is carried as an injectable
//! [`TaggedLayout`] value rather than compile-time constants. Decoding is a
//! correctness contract: it must reverse the exact bit layout, or the
//! diagnostics will be silently wrong.

use crate::error::{Error, Result};

/// Logical kind of an inline-encoded value, selected by the slot bits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaggedKind {
    Atom,
    String,
    Number,
    Date,
    IndexPath,
    ManagedObjectId,
    Unrecognized,
}

/// One entry of the fixed slot table.
#[derive(Clone, Copy, Debug)]
pub struct TaggedSlot {
    pub name: &'static str,
    pub kind: TaggedKind,
}

/// The architecture-independent slot table. Slots 1 and 7 are unused by the
/// runtime and map to no known kind.
pub const TAGGED_SLOTS: [TaggedSlot; 8] = [
    TaggedSlot { name: "NSAtom", kind: TaggedKind::Atom },
    TaggedSlot { name: "", kind: TaggedKind::Unrecognized },
    TaggedSlot { name: "NSString", kind: TaggedKind::String },
    TaggedSlot { name: "NSNumber", kind: TaggedKind::Number },
    TaggedSlot { name: "NSIndexPath", kind: TaggedKind::IndexPath },
    TaggedSlot { name: "NSManagedObjectID", kind: TaggedKind::ManagedObjectId },
    TaggedSlot { name: "NSDate", kind: TaggedKind::Date },
    TaggedSlot { name: "", kind: TaggedKind::Unrecognized },
];

/// Sixty-four character alphabet for 6-bit and 5-bit inline string
/// encodings, ordered by character frequency in real class and method
/// names.
pub const STRING_ALPHABET: &[u8; 64] =
    b"eilotrm.apdnsIc ufkMShjTRxgC4013bDNvwyUL2O856P-B79AFKEWV_zGJ/HYX";

/// Longest value representable by the inline string encoding.
pub const MAX_TAGGED_STRING_LEN: usize = 11;

/// Bit layout of tagged pointers for one architecture and runtime version.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TaggedLayout {
    /// Whether the target supports tagged pointers at all.
    pub supported: bool,
    /// Bits that mark a word as tagged rather than an address.
    pub tag_mask: u64,
    pub slot_shift: u32,
    pub slot_mask: u64,
    /// Left shift discarding high tag bits before payload extraction.
    pub payload_lshift: u32,
    /// Right shift realigning the payload after the left shift.
    pub payload_rshift: u32,
}

impl TaggedLayout {
    /// x86_64 layout: tag in bit 0, slot in bits 1-3, payload above bit 3.
    pub const fn x86_64() -> Self {
        Self {
            supported: true,
            tag_mask: 1,
            slot_shift: 1,
            slot_mask: 0x7,
            payload_lshift: 0,
            payload_rshift: 4,
        }
    }

    /// arm64 layout: tag in bit 63, slot in bits 60-62, payload below.
    pub const fn arm64() -> Self {
        Self {
            supported: true,
            tag_mask: 1 << 63,
            slot_shift: 60,
            slot_mask: 0x7,
            payload_lshift: 4,
            payload_rshift: 4,
        }
    }

    /// Layout for targets without tagged pointers: nothing is ever tagged.
    pub const fn disabled() -> Self {
        Self {
            supported: false,
            tag_mask: 0,
            slot_shift: 0,
            slot_mask: 0,
            payload_lshift: 0,
            payload_rshift: 0,
        }
    }

    pub fn is_tagged(&self, ptr: u64) -> bool {
        self.supported && (ptr & self.tag_mask) != 0
    }

    pub fn slot(&self, ptr: u64) -> usize {
        ((ptr >> self.slot_shift) & self.slot_mask) as usize
    }

    /// The fixed-width payload bit-field, zero-extended.
    pub fn payload(&self, ptr: u64) -> u64 {
        (ptr << self.payload_lshift) >> self.payload_rshift
    }

    /// The payload, sign-extended through the arithmetic right shift.
    pub fn signed_payload(&self, ptr: u64) -> i64 {
        ((ptr as i64) << self.payload_lshift) >> self.payload_rshift
    }

    /// Look up the slot table entry for a tagged pointer.
    ///
    /// The slot is range-checked against the table before indexing, and
    /// unused slots are rejected.
    pub fn slot_entry(&self, ptr: u64) -> Result<&'static TaggedSlot> {
        let slot = self.slot(ptr);

        let entry = match TAGGED_SLOTS.get(slot) {
            Some(entry) => entry,
            None => return Err(Error::UnrecognizedTag { slot }),
        };

        if entry.kind == TaggedKind::Unrecognized {
            return Err(Error::UnrecognizedTag { slot });
        }

        Ok(entry)
    }

    /// True only for tagged pointers whose slot maps to a known kind.
    pub fn is_valid_tagged(&self, ptr: u64) -> bool {
        self.is_tagged(ptr) && self.slot_entry(ptr).is_ok()
    }

    /// Decode an inline integer: sign-extend the payload, then discard the
    /// trailing type nibble.
    pub fn decode_number(&self, ptr: u64) -> i64 {
        self.signed_payload(ptr) >> 4
    }

    /// Decode an inline date: discard the tag nibble, then reinterpret the
    /// remaining bits as seconds since the epoch.
    pub fn decode_date(&self, ptr: u64) -> f64 {
        f64::from_bits(self.payload(ptr) << 4)
    }

    /// Decode an inline string into `out`, returning the number of
    /// characters written. The output is NUL-terminated.
    ///
    /// The low 4 payload bits give the length (0-11). Lengths up to 7 pack
    /// raw 7-bit ASCII a byte at a time, least-significant first. Lengths
    /// 8-9 pack 6-bit alphabet indices and 10-11 pack 5-bit indices, both
    /// most-significant group first. Anything longer is invalid.
    pub fn decode_string(&self, ptr: u64, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }

        let payload = self.payload(ptr);
        let length = (payload & 0xf) as usize;
        if length > MAX_TAGGED_STRING_LEN {
            out[0] = 0;
            return 0;
        }

        let copy = length.min(out.len() - 1);
        let mut value = payload >> 4;

        if length <= 7 {
            for slot in out.iter_mut().take(copy) {
                *slot = (value & 0x7f) as u8;
                value >>= 8;
            }
        } else if length <= 9 {
            for (i, slot) in out.iter_mut().take(copy).enumerate() {
                let index = (value >> ((length - 1 - i) * 6)) & 0x3f;
                *slot = STRING_ALPHABET[index as usize];
            }
        } else {
            for (i, slot) in out.iter_mut().take(copy).enumerate() {
                let index = (value >> ((length - 1 - i) * 5)) & 0x1f;
                *slot = STRING_ALPHABET[index as usize];
            }
        }

        out[copy] = 0;
        copy
    }
}
