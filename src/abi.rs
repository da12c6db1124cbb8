//! Validation and traversal of runtime class metadata in foreign memory.
//!
//! The runtime describes a class as a three-level chain: a raw class record
//! pointing at a read-write metadata record, which points at a read-only
//! metadata record. Any level may be unmapped or corrupted by the fault
//! being diagnosed, so every level is probed for readability at exactly its
//! own size before it is parsed, and every traversal is iteration-bounded
//! so cyclic metadata cannot hang the walker.
//!
//! Foreign memory is never cast and dereferenced. Each record is copied
//! into a local fixed buffer and decoded field by field.

use crate::error::{Error, Result};
use crate::mem::{wraps, ReadMemory};
use crate::tagged::TaggedLayout;

/// Longest accepted class or ivar name, including the terminating NUL.
pub const MAX_NAME_LEN: usize = 128;

/// Longest accepted ivar type encoding, including the terminating NUL.
pub const MAX_TYPE_LEN: usize = 100;

/// Superclass-chain hop bound. Corrupted or cyclic links terminate here.
pub const MAX_SUPERCLASS_HOPS: usize = 20;

/// Ivar-list entry bound. A count past this is treated as corruption.
pub const MAX_IVAR_COUNT: u32 = 256;

/// Read-only metadata flag: the class is a metaclass.
pub const RO_META: u32 = 1 << 0;

/// Read-only metadata flag: the class is a root class.
pub const RO_ROOT: u32 = 1 << 1;

/// Name of the root class shared by all block objects.
pub const BLOCK_BASE_CLASS: &str = "NSBlock";

const NAME_CONT: u8 = 1;
const NAME_START: u8 = 2;
const TYPE_CHAR: u8 = 4;

// Byte classification for identifier and type-encoding validation. Name
// characters follow C identifier rules plus '$'; type encodings accept any
// graphic ASCII byte.
static CHAR_CLASS: [u8; 256] = char_class_table();

const fn char_class_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut b = 0usize;

    while b < 256 {
        let c = b as u8;
        let alpha = (c >= b'a' && c <= b'z') || (c >= b'A' && c <= b'Z');
        let digit = c >= b'0' && c <= b'9';

        let mut flags = 0u8;
        if alpha || c == b'_' || c == b'$' {
            flags |= NAME_START | NAME_CONT;
        }
        if digit {
            flags |= NAME_CONT;
        }
        if c > 0x20 && c < 0x7f {
            flags |= TYPE_CHAR;
        }

        table[b] = flags;
        b += 1;
    }

    table
}

/// What a candidate address turned out to be.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification {
    Unknown,
    Class,
    Object,
    Block,
}

/// Architecture- and runtime-version-specific bit masks for metadata
/// pointers packed with extra flag bits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ObjcLayout {
    /// Mask extracting the class address from an object's isa field.
    pub isa_mask: u64,
    /// Mask extracting the read-write record address from the class data
    /// word.
    pub class_data_mask: u64,
}

impl ObjcLayout {
    pub const fn x86_64() -> Self {
        Self {
            isa_mask: 0x0000_7fff_ffff_fff8,
            class_data_mask: !0x7,
        }
    }

    pub const fn arm64() -> Self {
        Self {
            isa_mask: 0x0000_000f_ffff_fff8,
            class_data_mask: !0x7,
        }
    }

    /// arm64 mask used by runtime versions before the isa bit-field grew.
    pub const fn arm64_legacy() -> Self {
        Self {
            isa_mask: 0x0000_0007_ffff_fff8,
            class_data_mask: !0x7,
        }
    }
}

// Record layouts, 64-bit little-endian.

#[derive(Clone, Copy, Debug)]
struct RawClass {
    #[allow(dead_code)]
    isa: u64,
    superclass: u64,
    data: u64,
}

impl RawClass {
    // isa, superclass, dispatch table, data word.
    const SIZE: usize = 32;

    fn parse(buf: &[u8]) -> Self {
        Self {
            isa: u64_at(buf, 0),
            superclass: u64_at(buf, 8),
            data: u64_at(buf, 24),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct ClassRw {
    #[allow(dead_code)]
    flags: u32,
    #[allow(dead_code)]
    version: u32,
    ro: u64,
}

impl ClassRw {
    // flags, version, ro, three list arrays, sibling links, demangled name.
    const SIZE: usize = 64;

    fn parse(buf: &[u8]) -> Self {
        Self {
            flags: u32_at(buf, 0),
            version: u32_at(buf, 4),
            ro: u64_at(buf, 8),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct ClassRo {
    flags: u32,
    name: u64,
    ivars: u64,
}

impl ClassRo {
    // flags, instance start/size, reserved word, ivar layout, name, method
    // list, protocol list, ivar list, weak ivar layout, property list.
    const SIZE: usize = 72;

    fn parse(buf: &[u8]) -> Self {
        Self {
            flags: u32_at(buf, 0),
            name: u64_at(buf, 24),
            ivars: u64_at(buf, 48),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Ivar {
    offset: u64,
    name: u64,
    type_encoding: u64,
}

impl Ivar {
    // offset pointer, name, type encoding, alignment, size.
    const SIZE: usize = 32;

    fn parse(buf: &[u8]) -> Self {
        Self {
            offset: u64_at(buf, 0),
            name: u64_at(buf, 8),
            type_encoding: u64_at(buf, 16),
        }
    }
}

// Ivar list header: per-entry stride word and count, first entry inline.
const IVAR_LIST_HEADER: usize = 8;

fn u64_at(buf: &[u8], off: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(word)
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(word)
}

/// Walks and validates class metadata chains over a foreign address space.
pub struct ChainWalker<'a, M: ReadMemory> {
    mem: &'a M,
    objc: ObjcLayout,
    tagged: TaggedLayout,
}

impl<'a, M: ReadMemory> ChainWalker<'a, M> {
    pub fn new(mem: &'a M, objc: ObjcLayout, tagged: TaggedLayout) -> Self {
        Self { mem, objc, tagged }
    }

    /// Copy a foreign record into a local buffer, or report which probe
    /// failed.
    fn read_record(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        if addr == 0 || wraps(addr, buf.len()) {
            return Err(Error::AddressSpaceWrap { addr, len: buf.len() });
        }
        if !self.mem.copy_safely(addr, buf) {
            return Err(Error::MemoryInaccessible { addr, len: buf.len() });
        }
        Ok(())
    }

    fn read_raw_class(&self, addr: u64) -> Result<RawClass> {
        let mut buf = [0u8; RawClass::SIZE];
        self.read_record(addr, &mut buf)?;
        Ok(RawClass::parse(&buf))
    }

    fn read_rw(&self, raw: &RawClass) -> Result<ClassRw> {
        let rw_addr = raw.data & self.objc.class_data_mask;
        let mut buf = [0u8; ClassRw::SIZE];
        self.read_record(rw_addr, &mut buf)?;
        Ok(ClassRw::parse(&buf))
    }

    fn read_ro(&self, rw: &ClassRw) -> Result<ClassRo> {
        let mut buf = [0u8; ClassRo::SIZE];
        self.read_record(rw.ro, &mut buf)?;
        Ok(ClassRo::parse(&buf))
    }

    // Resolve the full chain for a class address, probing each level.
    fn ro_of_class(&self, class_addr: u64) -> Result<ClassRo> {
        let raw = self.read_raw_class(class_addr)?;
        let rw = self.read_rw(&raw)?;
        self.read_ro(&rw)
    }

    /// Read the class/isa field at `addr` and strip the encoding bits
    /// packed into it, yielding a class address.
    pub fn class_pointer_of(&self, addr: u64) -> Result<u64> {
        let mut word = [0u8; 8];
        self.read_record(addr, &mut word)?;
        Ok(u64::from_le_bytes(word) & self.objc.isa_mask)
    }

    /// Validate a NUL-terminated identifier of at most `max_len` bytes.
    pub fn is_valid_identifier(&self, addr: u64, max_len: usize) -> bool {
        self.validate_name(addr, max_len).is_ok()
    }

    /// Validate a NUL-terminated type encoding of at most `max_len` bytes.
    pub fn is_valid_type_encoding(&self, addr: u64, max_len: usize) -> bool {
        self.validate_type(addr, max_len).is_ok()
    }

    fn validate_name(&self, addr: u64, max_len: usize) -> Result<()> {
        if addr == 0 || wraps(addr, max_len) {
            return Err(Error::AddressSpaceWrap { addr, len: max_len });
        }

        let mut buf = [0u8; MAX_NAME_LEN];
        let window = max_len.min(MAX_NAME_LEN);
        let copied = self.mem.copy_max_possible(addr, &mut buf[..window]);
        if copied == 0 {
            return Err(Error::MemoryInaccessible { addr, len: window });
        }

        if CHAR_CLASS[buf[0] as usize] & NAME_START == 0 {
            return Err(Error::MalformedAbi { addr });
        }
        for &b in &buf[1..copied] {
            if b == 0 {
                return Ok(());
            }
            if CHAR_CLASS[b as usize] & NAME_CONT == 0 {
                return Err(Error::MalformedAbi { addr });
            }
        }

        // Ran off the readable window without a terminator.
        Err(Error::MalformedAbi { addr })
    }

    fn validate_type(&self, addr: u64, max_len: usize) -> Result<()> {
        if addr == 0 || wraps(addr, max_len) {
            return Err(Error::AddressSpaceWrap { addr, len: max_len });
        }

        let mut buf = [0u8; MAX_TYPE_LEN];
        let window = max_len.min(MAX_TYPE_LEN);
        let copied = self.mem.copy_max_possible(addr, &mut buf[..window]);
        if copied == 0 {
            return Err(Error::MemoryInaccessible { addr, len: window });
        }

        for (i, &b) in buf[..copied].iter().enumerate() {
            if b == 0 {
                return if i > 0 {
                    Ok(())
                } else {
                    Err(Error::MalformedAbi { addr })
                };
            }
            if CHAR_CLASS[b as usize] & TYPE_CHAR == 0 {
                return Err(Error::MalformedAbi { addr });
            }
        }

        Err(Error::MalformedAbi { addr })
    }

    /// Fail-fast validation of the full class metadata chain.
    pub fn is_valid_class(&self, class_addr: u64) -> bool {
        self.validate_class(class_addr).is_ok()
    }

    fn validate_class(&self, class_addr: u64) -> Result<()> {
        let raw = self.read_raw_class(class_addr)?;
        let rw = self.read_rw(&raw)?;
        let ro = self.read_ro(&rw)?;

        self.validate_name(ro.name, MAX_NAME_LEN)?;

        if ro.ivars != 0 {
            self.validate_ivar_list(ro.ivars)?;
        }

        Ok(())
    }

    // Walk the variable-stride ivar array, validating every entry.
    fn validate_ivar_list(&self, list_addr: u64) -> Result<()> {
        let mut header = [0u8; IVAR_LIST_HEADER];
        self.read_record(list_addr, &mut header)?;

        let stride = u32_at(&header, 0) & !0x3;
        let count = u32_at(&header, 4);

        if count == 0 {
            return Ok(());
        }
        if stride == 0 || count > MAX_IVAR_COUNT {
            return Err(Error::MalformedAbi { addr: list_addr });
        }

        let mut entry_addr = list_addr + IVAR_LIST_HEADER as u64;
        for _ in 0..count {
            let mut entry = [0u8; Ivar::SIZE];
            self.read_record(entry_addr, &mut entry)?;
            let ivar = Ivar::parse(&entry);

            // The offset field is itself a pointer to a 32-bit offset.
            let mut offset = [0u8; 4];
            self.read_record(ivar.offset, &mut offset)?;

            self.validate_name(ivar.name, MAX_NAME_LEN)?;
            self.validate_type(ivar.type_encoding, MAX_TYPE_LEN)?;

            entry_addr = entry_addr
                .checked_add(stride as u64)
                .ok_or(Error::AddressSpaceWrap {
                    addr: entry_addr,
                    len: stride as usize,
                })?;
        }

        Ok(())
    }

    /// True if `addr` plausibly refers to a live object: either a valid
    /// tagged pointer, or a heap word whose class chain validates.
    pub fn is_valid_object(&self, addr: u64) -> bool {
        if self.tagged.is_tagged(addr) {
            return self.tagged.is_valid_tagged(addr);
        }
        self.validate_object(addr).is_ok()
    }

    fn validate_object(&self, addr: u64) -> Result<()> {
        let class = self.class_pointer_of(addr)?;
        self.validate_class(class)
    }

    /// Walk superclass links to the root class, validating read-only
    /// metadata at each hop.
    ///
    /// Bounded at [`MAX_SUPERCLASS_HOPS`] so corrupted or cyclic links
    /// terminate instead of hanging the crash handler.
    pub fn base_class(&self, class_addr: u64) -> Result<u64> {
        let mut current = class_addr;

        for _ in 0..MAX_SUPERCLASS_HOPS {
            let ro = self.ro_of_class(current)?;
            if ro.flags & RO_ROOT != 0 {
                return Ok(current);
            }

            let raw = self.read_raw_class(current)?;
            if raw.superclass == 0 {
                return Err(Error::MalformedAbi { addr: current });
            }
            current = raw.superclass;
        }

        Err(Error::MalformedAbi { addr: class_addr })
    }

    /// Copy a class's name into `out`, returning the length (NUL excluded).
    pub fn copy_class_name(&self, class_addr: u64, out: &mut [u8]) -> Result<usize> {
        let ro = self.ro_of_class(class_addr)?;
        if ro.name == 0 || wraps(ro.name, out.len()) {
            return Err(Error::AddressSpaceWrap {
                addr: ro.name,
                len: out.len(),
            });
        }

        let copied = self.mem.copy_max_possible(ro.name, out);
        match out[..copied].iter().position(|&b| b == 0) {
            Some(nul) => Ok(nul),
            None => Err(Error::MalformedAbi { addr: ro.name }),
        }
    }

    /// Decide what `addr` refers to.
    ///
    /// Null and invalid-tagged addresses are `Unknown`. Valid tagged
    /// pointers are objects. Otherwise the class chain decides: a metaclass
    /// flag means `addr` is itself a class, a root class named
    /// [`BLOCK_BASE_CLASS`] means a block, anything else is an object.
    pub fn classify(&self, addr: u64) -> Classification {
        if addr == 0 {
            return Classification::Unknown;
        }

        if self.tagged.is_tagged(addr) {
            return if self.tagged.is_valid_tagged(addr) {
                Classification::Object
            } else {
                Classification::Unknown
            };
        }

        match self.classify_heap(addr) {
            Ok(class) => class,
            Err(_) => Classification::Unknown,
        }
    }

    fn classify_heap(&self, addr: u64) -> Result<Classification> {
        let class = self.class_pointer_of(addr)?;
        self.validate_class(class)?;

        let ro = self.ro_of_class(class)?;
        if ro.flags & RO_META != 0 {
            return Ok(Classification::Class);
        }

        // A missing root class is not an error at this point: the chain
        // already validated, so report a plain object.
        let base = match self.base_class(class) {
            Ok(base) => base,
            Err(_) => return Ok(Classification::Object),
        };

        let mut name = [0u8; MAX_NAME_LEN];
        let len = self.copy_class_name(base, &mut name)?;
        if &name[..len] == BLOCK_BASE_CLASS.as_bytes() {
            Ok(Classification::Block)
        } else {
            Ok(Classification::Object)
        }
    }
}
