//! Crash-time classification of candidate pointer values.
//!
//! Given raw memory belonging to a process that has just faulted (or any
//! process being inspected), decide whether a candidate pointer value
//! (typically a register) plausibly refers to a recognizable runtime
//! object, an inline-encoded value, or a printable string, without risking
//! a further fault. Probing is safe against unmapped, mid-write, and
//! deliberately corrupted memory; failures surface as conservative
//! negatives, never as panics.
//!
//! [`Classifier`] is the entry point. It is generic over a [`ReadMemory`]
//! source supplied by the host: [`proc::ProcessVm`] or [`proc::ProcMem`]
//! for live Linux processes, or [`SimulatedMemory`] for tests and replay.

pub mod abi;
pub mod classify;
pub mod error;
pub mod mem;
pub mod string;
pub mod tagged;
pub mod zombie;

#[cfg(target_os = "linux")]
pub mod proc;

pub use abi::{ChainWalker, Classification, ObjcLayout};
pub use classify::{Classifier, Description, Runtime, Verdict};
pub use error::Error;
pub use mem::{ReadMemory, SimulatedMemory};
pub use tagged::{TaggedKind, TaggedLayout};
pub use zombie::{ZombieCache, ZombieEntry};

#[cfg(target_os = "linux")]
pub use proc::{Pid, ProcMem, ProcessVm};
