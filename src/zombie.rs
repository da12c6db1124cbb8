//! Read-only view of an externally owned zombie-address cache.
//!
//! The cache maps the former address of a deallocated object to its class
//! name, letting a dangling pointer still be described. It is populated
//! elsewhere (by intercepting deallocation); this crate performs exactly
//! one masked-index lookup per query and never writes.

use crate::error::{Error, Result};

/// Longest class name stored per entry, including the terminating NUL.
pub const ZOMBIE_NAME_LEN: usize = 64;

/// One slot of the open, non-chained hash table. An address of 0 marks an
/// empty slot.
#[derive(Clone, Copy, Debug)]
pub struct ZombieEntry {
    pub address: u64,
    pub class_name: [u8; ZOMBIE_NAME_LEN],
}

impl ZombieEntry {
    pub const fn empty() -> Self {
        Self {
            address: 0,
            class_name: [0; ZOMBIE_NAME_LEN],
        }
    }

    /// The stored class name, up to its NUL terminator.
    pub fn name(&self) -> &[u8] {
        let nul = self
            .class_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(ZOMBIE_NAME_LEN);
        &self.class_name[..nul]
    }
}

/// Borrowed, lookup-only view over a power-of-two entry table.
#[derive(Clone, Copy, Debug)]
pub struct ZombieCache<'a> {
    entries: &'a [ZombieEntry],
    mask: usize,
}

impl<'a> ZombieCache<'a> {
    /// Wrap an externally owned table. The length must be a nonzero power
    /// of two so the hash can be reduced by masking.
    pub fn new(entries: &'a [ZombieEntry]) -> Result<Self> {
        let len = entries.len();
        if len == 0 || !len.is_power_of_two() {
            return Err(Error::InvalidCacheLen { len });
        }

        Ok(Self {
            entries,
            mask: len - 1,
        })
    }

    // Object addresses are at least 16-byte aligned, so the low bits carry
    // no information.
    fn index_of(&self, addr: u64) -> usize {
        ((addr >> 4) as usize) & self.mask
    }

    /// Look up a former object address. Exactly one probe: any mismatch or
    /// null query is a miss.
    pub fn lookup(&self, addr: u64) -> Option<&'a ZombieEntry> {
        if addr == 0 {
            return None;
        }

        let entry = &self.entries[self.index_of(addr)];
        if entry.address == addr {
            Some(entry)
        } else {
            None
        }
    }
}
