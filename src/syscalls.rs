//! Typed wrappers over the host calls.
//!
//! Every wrapper runs the same protocol inside one memory scope: encode the
//! variable-length inputs, reserve the output slot, invoke the import, then
//! either decode the slot (code zero) or translate the code into an [`Error`]
//! without touching the slot. The scope is released on every path out.

use crate::abi::Abi;
use crate::config::{Config, ConfigError};
use crate::error::{Result, check};
use crate::memory::{GuestAddr, LinearMemory, with_scoped_memory_allocator};
use crate::types::{Fd, FdFlags, LookupFlags, OFlags, Rights};
use tracing::{debug, instrument, trace};

/// A host paired with the scratch memory its calls are marshalled through.
pub struct Syscalls<A> {
    abi: A,
    memory: LinearMemory,
}

#[cfg(target_arch = "wasm32")]
impl Syscalls<crate::abi::WasiImports> {
    /// Binds the real host imports, with scratch memory carved out of this
    /// module's own linear memory.
    pub fn wasi(config: &Config) -> std::result::Result<Self, ConfigError> {
        let memory = LinearMemory::in_process(config)?;
        Ok(Syscalls::with_memory(crate::abi::WasiImports, memory))
    }
}

impl<A: Abi> Syscalls<A> {
    /// Pairs `abi` with fresh scratch memory laid out by `config`.
    ///
    /// Fails if `config` does not validate.
    pub fn new(abi: A, config: &Config) -> std::result::Result<Self, ConfigError> {
        Ok(Syscalls::with_memory(abi, LinearMemory::new(config)?))
    }

    pub fn with_memory(abi: A, memory: LinearMemory) -> Self {
        Syscalls { abi, memory }
    }

    pub fn abi(&self) -> &A {
        &self.abi
    }

    pub fn abi_mut(&mut self) -> &mut A {
        &mut self.abi
    }

    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    /// Writes `bufs` to `fd` as one vectored write and returns the number of
    /// bytes the host reports written.
    #[instrument(level = "trace", skip(self, bufs), fields(nbufs = bufs.len()))]
    pub fn write(&mut self, fd: Fd, bufs: &[&[u8]]) -> Result<usize> {
        let Syscalls { abi, memory } = self;
        with_scoped_memory_allocator(memory, |alloc| -> Result<usize> {
            let iovecs = bufs
                .iter()
                .map(|buf| (alloc.write_to_linear_memory(buf), buf.len() as u32))
                .collect::<Vec<_>>();
            let iovs = alloc.write_iovec_array(&iovecs);
            let nwritten = alloc.allocate(4);
            let code = abi.fd_write(
                alloc.memory(),
                fd.raw() as i32,
                iovs.as_abi(),
                iovecs.len() as i32,
                nwritten.as_abi(),
            );
            trace!(code, "fd_write");
            check(code).inspect_err(|e| debug!(errno = e.kind().name(), "fd_write failed"))?;
            Ok(alloc.dec_u32(nwritten)? as usize)
        })
    }

    /// Reads from `fd` into `bufs`, filling them in order, and returns the
    /// number of bytes read.
    #[instrument(level = "trace", skip(self, bufs), fields(nbufs = bufs.len()))]
    pub fn read(&mut self, fd: Fd, bufs: &mut [&mut [u8]]) -> Result<usize> {
        let Syscalls { abi, memory } = self;
        with_scoped_memory_allocator(memory, |alloc| -> Result<usize> {
            let iovecs = bufs
                .iter()
                .map(|buf| (alloc.allocate_aligned(buf.len() as u32, 1), buf.len() as u32))
                .collect::<Vec<_>>();
            let iovs = alloc.write_iovec_array(&iovecs);
            let nread = alloc.allocate(4);
            let code = abi.fd_read(
                alloc.memory(),
                fd.raw() as i32,
                iovs.as_abi(),
                iovecs.len() as i32,
                nread.as_abi(),
            );
            trace!(code, "fd_read");
            check(code).inspect_err(|e| debug!(errno = e.kind().name(), "fd_read failed"))?;

            let nread = alloc.dec_u32(nread)?;
            let mut remaining = nread;
            for (buf, (addr, len)) in bufs.iter_mut().zip(&iovecs) {
                if remaining == 0 {
                    break;
                }
                let chunk = remaining.min(*len);
                buf[..chunk as usize].copy_from_slice(alloc.read(*addr, chunk)?);
                remaining -= chunk;
            }
            Ok(nread as usize)
        })
    }

    /// Releases `fd`.
    #[instrument(level = "trace", skip(self))]
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let Syscalls { abi, memory } = self;
        with_scoped_memory_allocator(memory, |alloc| {
            let code = abi.fd_close(alloc.memory(), fd.raw() as i32);
            trace!(code, "fd_close");
            check(code).inspect_err(|e| debug!(errno = e.kind().name(), "fd_close failed"))
        })
    }

    /// Creates the directory `path`, resolved relative to `fd`.
    #[instrument(level = "trace", skip(self))]
    pub fn create_directory(&mut self, fd: Fd, path: &str) -> Result<()> {
        let Syscalls { abi, memory } = self;
        with_scoped_memory_allocator(memory, |alloc| {
            let path_addr = alloc.write_to_linear_memory(path.as_bytes());
            let code = abi.path_create_directory(
                alloc.memory(),
                fd.raw() as i32,
                path_addr.as_abi(),
                path.len() as i32,
            );
            trace!(code, "path_create_directory");
            check(code).inspect_err(|e| {
                debug!(errno = e.kind().name(), "path_create_directory failed")
            })
        })
    }

    /// Opens `path`, resolved relative to `fd`, and returns the new descriptor.
    ///
    /// The descriptor is granted the requested rights that the host is able to
    /// grant, which may be fewer than requested.
    #[instrument(level = "trace", skip(self))]
    pub fn open(
        &mut self,
        fd: Fd,
        dirflags: LookupFlags,
        path: &str,
        oflags: OFlags,
        rights_base: Rights,
        rights_inheriting: Rights,
        fdflags: FdFlags,
    ) -> Result<Fd> {
        let Syscalls { abi, memory } = self;
        with_scoped_memory_allocator(memory, |alloc| -> Result<Fd> {
            let path_addr = alloc.write_to_linear_memory(path.as_bytes());
            let opened: GuestAddr = alloc.allocate(4);
            let code = abi.path_open(
                alloc.memory(),
                fd.raw() as i32,
                dirflags.bits() as i32,
                path_addr.as_abi(),
                path.len() as i32,
                i32::from(oflags.bits()),
                rights_base.bits() as i64,
                rights_inheriting.bits() as i64,
                i32::from(fdflags.bits()),
                opened.as_abi(),
            );
            trace!(code, "path_open");
            check(code).inspect_err(|e| debug!(errno = e.kind().name(), "path_open failed"))?;
            Ok(Fd::from(alloc.dec_u32(opened)?))
        })
    }
}
