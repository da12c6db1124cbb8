use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A probed region of the target could not be fully read.
    #[error("Could not read {len} bytes at {addr:#x} in target memory")]
    MemoryInaccessible { addr: u64, len: usize },

    /// A windowed probe would overflow the address width.
    #[error("Address range {addr:#x} + {len} wraps the address space")]
    AddressSpaceWrap { addr: u64, len: usize },

    /// An identifier, type encoding, or list stride failed validation.
    #[error("Malformed runtime metadata at {addr:#x}")]
    MalformedAbi { addr: u64 },

    /// A tagged pointer's slot maps to no known kind.
    #[error("Tagged pointer slot {slot} maps to no known kind")]
    UnrecognizedTag { slot: usize },

    /// A formatted description did not fit its destination buffer.
    #[error("Description truncated to fit the destination buffer")]
    FormatTruncated,

    /// A zombie cache must be sized to a power of two for masked indexing.
    #[error("Zombie cache length {len} is not a nonzero power of two")]
    InvalidCacheLen { len: usize },

    #[error("Could not open memory of process {pid}")]
    Open { pid: libc::pid_t, source: io::Error },
}
