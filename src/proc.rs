//! Host-supplied memory sources for inspecting Linux processes.
//!
//! The classification core is generic over [`ReadMemory`]; these are the
//! two concrete sources a Linux host can supply. Both express failure as a
//! byte count, never a fault, and both require the usual ptrace-style
//! permissions over the target (the current process can always read
//! itself).

use std::convert::TryFrom;
use std::fs;
use std::io::IoSliceMut;
use std::os::unix::fs::FileExt;

use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use tracing::debug;

pub use nix::unistd::Pid;

use crate::error::{Error, Result};
use crate::mem::ReadMemory;

/// Kernel-mediated reads via `process_vm_readv(2)`.
///
/// Each attempt is all-or-nothing: the kernel refuses the whole span if any
/// byte of it is unreadable, which is exactly the atomic copy contract the
/// accessor algorithms build on.
#[derive(Clone, Copy, Debug)]
pub struct ProcessVm {
    pid: Pid,
}

impl ProcessVm {
    pub fn new(pid: Pid) -> Self {
        debug!(pid = pid.as_raw(), "reading target via process_vm_readv");
        Self { pid }
    }

    /// A source over the current process's own address space.
    pub fn current() -> Self {
        Self::new(nix::unistd::getpid())
    }
}

impl ReadMemory for ProcessVm {
    fn try_read(&self, addr: u64, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let base = match usize::try_from(addr) {
            Ok(base) => base,
            Err(_) => return 0,
        };

        let remote = [RemoteIoVec {
            base,
            len: buf.len(),
        }];
        let mut local = [IoSliceMut::new(buf)];

        process_vm_readv(self.pid, &mut local, &remote).unwrap_or(0)
    }
}

/// Reads via pread on `/proc/<pid>/mem`.
///
/// Unlike [`ProcessVm`], a read spanning an unmapped page can partially
/// succeed, returning the readable prefix length.
#[derive(Debug)]
pub struct ProcMem {
    file: fs::File,
}

impl ProcMem {
    pub fn open(pid: Pid) -> Result<Self> {
        let path = format!("/proc/{}/mem", pid.as_raw());
        let file = fs::File::open(&path).map_err(|source| Error::Open {
            pid: pid.as_raw(),
            source,
        })?;

        debug!(pid = pid.as_raw(), "opened target memory image");

        Ok(Self { file })
    }
}

impl ReadMemory for ProcMem {
    fn try_read(&self, addr: u64, buf: &mut [u8]) -> usize {
        self.file.read_at(buf, addr).unwrap_or(0)
    }
}
