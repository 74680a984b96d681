//! Linear memory shared with the host, and the scoped allocator that hands out
//! short-lived spans of it for a single host call.
//!
//! Addresses are never raw pointers: a [`GuestAddr`] is the integer the host
//! sees, and every access translates it back into the region and checks it
//! against the live part of the region. Everything allocated inside a scope is
//! released when the scope's [`ScopedAllocator`] is dropped, so once a scope
//! ends its addresses fail every access with [`MemoryError::OutOfBounds`].

use crate::config::{Config, ConfigError};
use std::ops::Range;
use thiserror::Error;

/// Alignment of spans returned by [`ScopedAllocator::allocate`], enough for
/// any scalar the ABI reads or writes.
pub const DEFAULT_ALIGN: u32 = 8;

/// Byte written over released spans when poisoning is enabled.
const POISON: u8 = 0xa5;

/// An address in linear memory, as seen by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuestAddr(u32);

impl GuestAddr {
    pub const fn new(raw: u32) -> GuestAddr {
        GuestAddr(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// The address reinterpreted as the ABI's 32-bit integer argument.
    pub const fn as_abi(&self) -> i32 {
        self.0 as i32
    }

    /// Decodes an address argument received from the ABI.
    pub const fn from_abi(raw: i32) -> GuestAddr {
        GuestAddr(raw as u32)
    }

    pub fn checked_add(&self, offset: u32) -> Option<GuestAddr> {
        self.0.checked_add(offset).map(GuestAddr)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("{len} bytes at {addr:#x} are out of bounds of live linear memory")]
    OutOfBounds { addr: u32, len: u32 },
    #[error("address {addr:#x} is not aligned to {align} bytes")]
    Misaligned { addr: u32, align: u32 },
}

/// A contiguous region of linear memory with a high-water mark.
///
/// Only bytes below the mark are live; the scoped allocator moves the mark up
/// as it hands out spans and back down when its scope ends.
pub struct LinearMemory {
    bytes: Box<[u8]>,
    origin: u32,
    top: u32,
    poison_on_release: bool,
}

impl LinearMemory {
    /// Creates a region whose first byte is visible to the host at
    /// `config.memory_origin`, after validating `config`.
    pub fn new(config: &Config) -> Result<LinearMemory, ConfigError> {
        config.validate()?;
        let mut memory = LinearMemory::with_origin(config.scratch_size, config.memory_origin);
        memory.poison_on_release = config.poison_on_release;
        Ok(memory)
    }

    /// Creates a zeroed region of `size` bytes addressed from `origin`.
    ///
    /// # Panics
    ///
    /// Panics if the region would extend past the 32-bit address space.
    pub fn with_origin(size: u32, origin: u32) -> LinearMemory {
        assert!(
            origin.checked_add(size).is_some(),
            "linear memory of {size} bytes at {origin:#x} overflows the address space"
        );
        LinearMemory {
            bytes: vec![0; size as usize].into_boxed_slice(),
            origin,
            top: 0,
            poison_on_release: true,
        }
    }

    /// Creates a region inside this module's own memory, addressed by its real
    /// location so the host can dereference encoded addresses directly.
    #[cfg(target_arch = "wasm32")]
    pub fn in_process(config: &Config) -> Result<LinearMemory, ConfigError> {
        config.validate()?;
        let bytes = vec![0; config.scratch_size as usize].into_boxed_slice();
        let origin = bytes.as_ptr() as usize as u32;
        Ok(LinearMemory {
            bytes,
            origin,
            top: 0,
            poison_on_release: config.poison_on_release,
        })
    }

    pub fn origin(&self) -> GuestAddr {
        GuestAddr(self.origin)
    }

    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Number of bytes currently held by an open scope.
    pub fn in_use(&self) -> u32 {
        self.top
    }

    pub fn set_poison_on_release(&mut self, enable: bool) {
        self.poison_on_release = enable;
    }

    fn live_range(&self, addr: GuestAddr, len: u32) -> Result<Range<usize>, MemoryError> {
        let oob = || MemoryError::OutOfBounds { addr: addr.0, len };
        let start = addr.0.checked_sub(self.origin).ok_or_else(oob)?;
        let end = start.checked_add(len).ok_or_else(oob)?;
        if end > self.top {
            return Err(oob());
        }
        Ok(start as usize..end as usize)
    }

    fn check_align(addr: GuestAddr, align: u32) -> Result<(), MemoryError> {
        if addr.0 % align != 0 {
            return Err(MemoryError::Misaligned {
                addr: addr.0,
                align,
            });
        }
        Ok(())
    }

    pub fn read(&self, addr: GuestAddr, len: u32) -> Result<&[u8], MemoryError> {
        let range = self.live_range(addr, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write(&mut self, addr: GuestAddr, data: &[u8]) -> Result<(), MemoryError> {
        let len = u32::try_from(data.len()).map_err(|_| MemoryError::OutOfBounds {
            addr: addr.0,
            len: u32::MAX,
        })?;
        let range = self.live_range(addr, len)?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Decodes an array of `(address, length)` pairs, the layout of both
    /// `ciovec` and `iovec`.
    pub fn dec_iovec_slice(
        &self,
        addr: GuestAddr,
        count: u32,
    ) -> Result<Vec<(GuestAddr, u32)>, MemoryError> {
        Self::check_align(addr, 4)?;
        let len_bytes = count.checked_mul(IOVEC_SIZE).ok_or(MemoryError::OutOfBounds {
            addr: addr.0,
            len: u32::MAX,
        })?;
        let raw = self.read(addr, len_bytes)?;
        Ok(raw
            .chunks_exact(IOVEC_SIZE as usize)
            .map(|pair| {
                let buf = u32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
                let buf_len = u32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]);
                (GuestAddr(buf), buf_len)
            })
            .collect())
    }

    fn reserve(&mut self, len: u32, align: u32) -> Option<GuestAddr> {
        debug_assert!(align.is_power_of_two());
        let cursor = self.origin.checked_add(self.top)?;
        let aligned = cursor.checked_add(align - 1)? & !(align - 1);
        let start = aligned - self.origin;
        let end = start.checked_add(len)?;
        if end > self.size() {
            return None;
        }
        self.top = end;
        Some(GuestAddr(aligned))
    }

    fn release_to(&mut self, mark: u32) -> u32 {
        let freed = self.top - mark;
        if self.poison_on_release {
            self.bytes[mark as usize..self.top as usize].fill(POISON);
        }
        self.top = mark;
        freed
    }
}

/// Size in bytes of one encoded `(address, length)` pair.
pub const IOVEC_SIZE: u32 = 8;

macro_rules! dec_enc_scalar {
    ($ty:ident, $dec:ident, $enc:ident) => {
        impl LinearMemory {
            pub fn $dec(&self, addr: GuestAddr) -> Result<$ty, MemoryError> {
                const SIZE: u32 = std::mem::size_of::<$ty>() as u32;
                Self::check_align(addr, SIZE)?;
                let raw = self.read(addr, SIZE)?;
                let mut buf = [0; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(raw);
                Ok($ty::from_le_bytes(buf))
            }

            pub fn $enc(&mut self, addr: GuestAddr, value: $ty) -> Result<(), MemoryError> {
                const SIZE: u32 = std::mem::size_of::<$ty>() as u32;
                Self::check_align(addr, SIZE)?;
                self.write(addr, &value.to_le_bytes())
            }
        }
    };
}

dec_enc_scalar!(u16, dec_u16, enc_u16);
dec_enc_scalar!(u32, dec_u32, enc_u32);
dec_enc_scalar!(u64, dec_u64, enc_u64);

/// Bump allocator over the free part of a [`LinearMemory`] for one scope.
///
/// Holding the allocator borrows the memory mutably, so only one scope can be
/// open on a memory at a time. Dropping it releases everything it allocated,
/// whichever way the scope is left.
pub struct ScopedAllocator<'a> {
    memory: &'a mut LinearMemory,
    mark: u32,
}

impl<'a> ScopedAllocator<'a> {
    pub fn new(memory: &'a mut LinearMemory) -> ScopedAllocator<'a> {
        let mark = memory.top;
        ScopedAllocator { memory, mark }
    }

    /// Returns a fresh span of at least `byte_count` bytes, aligned to
    /// [`DEFAULT_ALIGN`].
    ///
    /// # Panics
    ///
    /// Running out of scratch memory is fatal; there is no recovery path.
    pub fn allocate(&mut self, byte_count: u32) -> GuestAddr {
        self.allocate_aligned(byte_count, DEFAULT_ALIGN)
    }

    pub fn allocate_aligned(&mut self, byte_count: u32, align: u32) -> GuestAddr {
        match self.memory.reserve(byte_count, align) {
            Some(addr) => addr,
            None => panic!(
                "scoped memory exhausted: {byte_count} bytes requested with {} of {} in use",
                self.memory.top,
                self.memory.size()
            ),
        }
    }

    /// Copies `bytes` into a fresh span and returns its address.
    pub fn write_to_linear_memory(&mut self, bytes: &[u8]) -> GuestAddr {
        let len = match u32::try_from(bytes.len()) {
            Ok(len) => len,
            Err(_) => panic!("scoped memory exhausted: {} bytes requested", bytes.len()),
        };
        let addr = self.allocate_aligned(len, 1);
        let start = (addr.0 - self.memory.origin) as usize;
        self.memory.bytes[start..start + bytes.len()].copy_from_slice(bytes);
        addr
    }

    /// Encodes `(address, length)` pairs in order and returns the array's
    /// address. An empty array still gets a valid, aligned address.
    pub fn write_iovec_array(&mut self, iovecs: &[(GuestAddr, u32)]) -> GuestAddr {
        let mut encoded = Vec::with_capacity(iovecs.len() * IOVEC_SIZE as usize);
        for (addr, len) in iovecs {
            encoded.extend_from_slice(&addr.0.to_le_bytes());
            encoded.extend_from_slice(&len.to_le_bytes());
        }
        let array = self.allocate_aligned(encoded.len() as u32, 4);
        let start = (array.0 - self.memory.origin) as usize;
        self.memory.bytes[start..start + encoded.len()].copy_from_slice(&encoded);
        array
    }

    pub fn read(&self, addr: GuestAddr, len: u32) -> Result<&[u8], MemoryError> {
        self.memory.read(addr, len)
    }

    pub fn dec_u32(&self, addr: GuestAddr) -> Result<u32, MemoryError> {
        self.memory.dec_u32(addr)
    }

    /// The underlying memory, for handing to the host during a call.
    pub fn memory(&mut self) -> &mut LinearMemory {
        &mut *self.memory
    }

    /// Bytes allocated by this scope so far, including alignment padding.
    pub fn used(&self) -> u32 {
        self.memory.top - self.mark
    }
}

impl Drop for ScopedAllocator<'_> {
    fn drop(&mut self) {
        let freed = self.memory.release_to(self.mark);
        tracing::trace!(freed, "released scoped memory");
    }
}

/// Runs `body` with a fresh allocator over `memory`; everything it allocates
/// is released when `body` returns or unwinds.
pub fn with_scoped_memory_allocator<R>(
    memory: &mut LinearMemory,
    body: impl FnOnce(&mut ScopedAllocator<'_>) -> R,
) -> R {
    let mut allocator = ScopedAllocator::new(memory);
    body(&mut allocator)
}
