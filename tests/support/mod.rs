//! Builders for simulated runtime images and tagged-pointer words.

#![allow(unused)]

use notable::tagged::{TaggedLayout, STRING_ALPHABET};
use notable::SimulatedMemory;

/// Where the pieces of one simulated class live.
#[derive(Clone, Copy, Debug)]
pub struct ClassAddrs {
    pub class: u64,
    pub rw: u64,
    pub ro: u64,
    pub name: u64,
}

impl ClassAddrs {
    /// Spread the records of one class across a region starting at `base`.
    pub fn at(base: u64) -> Self {
        Self {
            class: base,
            rw: base + 0x100,
            ro: base + 0x200,
            name: base + 0x300,
        }
    }
}

fn put_u64(buf: &mut [u8], off: usize, value: u64) {
    buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

/// Raw class record: isa, superclass, dispatch table, data word.
pub fn raw_class(isa: u64, superclass: u64, data: u64) -> Vec<u8> {
    let mut buf = vec![0u8; 32];
    put_u64(&mut buf, 0, isa);
    put_u64(&mut buf, 8, superclass);
    put_u64(&mut buf, 24, data);
    buf
}

/// Read-write metadata record pointing at its read-only record.
pub fn class_rw(ro: u64) -> Vec<u8> {
    let mut buf = vec![0u8; 64];
    put_u32(&mut buf, 0, 0x8000_0000);
    put_u64(&mut buf, 8, ro);
    buf
}

/// Read-only metadata record with the given flags, name, and ivar list.
pub fn class_ro(flags: u32, name: u64, ivars: u64) -> Vec<u8> {
    let mut buf = vec![0u8; 72];
    put_u32(&mut buf, 0, flags);
    put_u32(&mut buf, 8, 16); // instance size
    put_u64(&mut buf, 24, name);
    put_u64(&mut buf, 48, ivars);
    buf
}

/// Variable-stride ivar array: header plus (offset, name, type) entries.
pub fn ivar_list(stride: u32, entries: &[(u64, u64, u64)]) -> Vec<u8> {
    let mut buf = vec![0u8; 8 + stride as usize * entries.len()];
    put_u32(&mut buf, 0, stride);
    put_u32(&mut buf, 4, entries.len() as u32);

    for (i, &(offset, name, type_encoding)) in entries.iter().enumerate() {
        let at = 8 + i * stride as usize;
        put_u64(&mut buf, at, offset);
        put_u64(&mut buf, at + 8, name);
        put_u64(&mut buf, at + 16, type_encoding);
    }

    buf
}

/// Install a complete, valid class chain. The data word carries flag bits
/// in its low bits, as the runtime packs them.
pub fn install_class(
    mem: &mut SimulatedMemory,
    at: ClassAddrs,
    name: &str,
    ro_flags: u32,
    superclass: u64,
    ivars: u64,
) {
    mem.map(at.class, raw_class(at.class + 0x1000, superclass, at.rw | 0x3));
    mem.map(at.rw, class_rw(at.ro));
    mem.map(at.ro, class_ro(ro_flags, at.name, ivars));

    let mut name_bytes = name.as_bytes().to_vec();
    name_bytes.push(0);
    mem.map(at.name, name_bytes);
}

/// Assemble a tagged word for the x86_64 layout: payload above the low
/// nibble, slot in bits 1-3, tag in bit 0.
pub fn tagged_word_x86_64(slot: u64, payload: u64) -> u64 {
    (payload << 4) | (slot << 1) | 1
}

/// Encode a string the way the runtime inlines it, for round-trip tests.
pub fn encode_tagged_string(s: &str) -> u64 {
    let bytes = s.as_bytes();
    let len = bytes.len() as u64;
    assert!(bytes.len() <= 11, "inline strings hold at most 11 characters");

    let mut value = 0u64;
    if bytes.len() <= 7 {
        for (i, &b) in bytes.iter().enumerate() {
            assert!(b < 0x80);
            value |= (b as u64) << (8 * i);
        }
    } else {
        let bits = if bytes.len() <= 9 { 6 } else { 5 };
        for (i, &b) in bytes.iter().enumerate() {
            let index = STRING_ALPHABET
                .iter()
                .position(|&a| a == b)
                .expect("character not in the inline alphabet") as u64;
            assert!(index < (1 << bits));
            value |= index << ((bytes.len() - 1 - i) as u64 * bits);
        }
    }

    let payload = (value << 4) | len;
    tagged_word_x86_64(2, payload)
}

/// A tagged NSNumber word holding `value`.
pub fn tagged_number(value: i64) -> u64 {
    // Value sits above the type nibble within the payload.
    let payload = (value << 4) as u64;
    tagged_word_x86_64(3, payload)
}

/// The x86_64 layout used by every simulated-image test.
pub fn layout() -> TaggedLayout {
    TaggedLayout::x86_64()
}
