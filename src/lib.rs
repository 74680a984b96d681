//! Typed bindings to the WASI `wasi_snapshot_preview1` system calls.
//!
//! The host only understands integers: addresses into linear memory, lengths,
//! bitmasks and a status code. [`Syscalls`] bridges typed calls to that
//! convention. Each call opens a scope on a [`LinearMemory`], encodes its
//! strings and buffers into it, invokes the matching [`Abi`] function, and
//! decodes either the output slot or an [`Error`] carrying the host's
//! [`Errno`]. The scope, and everything allocated in it, is released before
//! the call returns.
//!
//! On `wasm32` the real host imports are used through
//! `Syscalls::wasi`. Elsewhere, [`emulator::EmulatedHost`] provides the same
//! ABI over an in-memory filesystem.

pub mod abi;
pub mod config;
pub mod emulator;
mod error;
pub mod memory;
mod syscalls;
pub mod types;

pub use crate::abi::Abi;
pub use crate::config::{Config, ConfigError};
pub use crate::error::{Errno, Error, Result};
pub use crate::memory::{
    GuestAddr, LinearMemory, MemoryError, ScopedAllocator, with_scoped_memory_allocator,
};
pub use crate::syscalls::Syscalls;
pub use crate::types::{Fd, FdFlags, LookupFlags, OFlags, Rights};
