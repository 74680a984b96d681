//! Descriptors and the flag vocabularies passed across the ABI.
//!
//! Each flag set is a typed bitmask whose `bits()` have exactly the integer
//! width the host expects for that argument.

use bitflags::bitflags;
use std::fmt;

/// An opaque handle to a resource opened by the host.
///
/// Numbering is chosen by the host and is not sequential; never assume an
/// ordering between descriptors or that a closed number will be reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(u32);

impl Fd {
    pub const STDIN: Fd = Fd(0);
    pub const STDOUT: Fd = Fd(1);
    pub const STDERR: Fd = Fd(2);

    /// The lowest number that is not one of the standard streams.
    pub const FIRST_NON_STDIO: u32 = 3;

    pub const fn from_raw(raw: u32) -> Fd {
        Fd(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn is_stdio(&self) -> bool {
        self.0 < Self::FIRST_NON_STDIO
    }
}

impl From<u32> for Fd {
    fn from(raw: u32) -> Fd {
        Fd(raw)
    }
}

impl From<Fd> for u32 {
    fn from(fd: Fd) -> u32 {
        fd.0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

bitflags! {
    /// Flags determining how a path is resolved.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct LookupFlags: u32 {
        /// As long as the resolved path corresponds to a symbolic link, it is expanded.
        const SYMLINK_FOLLOW = 1 << 0;
    }
}

bitflags! {
    /// Open-time behavior for `path_open`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct OFlags: u16 {
        /// Create file if it does not exist.
        const CREAT     = 1 << 0;
        /// Fail if not a directory.
        const DIRECTORY = 1 << 1;
        /// Fail if file already exists.
        const EXCL      = 1 << 2;
        /// Truncate file to size 0.
        const TRUNC     = 1 << 3;
    }
}

bitflags! {
    /// Descriptor-level behavior modifiers.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct FdFlags: u16 {
        /// Append mode: data written is appended to the end of the file.
        const APPEND   = 1 << 0;
        /// Write according to synchronized I/O data integrity completion.
        const DSYNC    = 1 << 1;
        const NONBLOCK = 1 << 2;
        const RSYNC    = 1 << 3;
        /// Write according to synchronized I/O file integrity completion.
        const SYNC     = 1 << 4;
    }
}

bitflags! {
    /// Capabilities of a descriptor.
    ///
    /// A descriptor carries two of these: the base rights gate operations on the
    /// descriptor itself, the inheriting rights bound what descriptors opened
    /// through it may be granted.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct Rights: u64 {
        const FD_DATASYNC             = 1 << 0;
        /// The right to invoke `fd_read`.
        const FD_READ                 = 1 << 1;
        const FD_SEEK                 = 1 << 2;
        const FD_FDSTAT_SET_FLAGS     = 1 << 3;
        const FD_SYNC                 = 1 << 4;
        const FD_TELL                 = 1 << 5;
        /// The right to invoke `fd_write`.
        const FD_WRITE                = 1 << 6;
        const FD_ADVISE               = 1 << 7;
        const FD_ALLOCATE             = 1 << 8;
        /// The right to invoke `path_create_directory`.
        const PATH_CREATE_DIRECTORY   = 1 << 9;
        /// The right to invoke `path_open` with `OFlags::CREAT`.
        const PATH_CREATE_FILE        = 1 << 10;
        const PATH_LINK_SOURCE        = 1 << 11;
        const PATH_LINK_TARGET        = 1 << 12;
        /// The right to invoke `path_open`.
        const PATH_OPEN               = 1 << 13;
        const FD_READDIR              = 1 << 14;
        const PATH_READLINK           = 1 << 15;
        const PATH_RENAME_SOURCE      = 1 << 16;
        const PATH_RENAME_TARGET      = 1 << 17;
        const PATH_FILESTAT_GET       = 1 << 18;
        /// Includes the right to invoke `path_open` with `OFlags::TRUNC`.
        const PATH_FILESTAT_SET_SIZE  = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET         = 1 << 21;
        const FD_FILESTAT_SET_SIZE    = 1 << 22;
        const FD_FILESTAT_SET_TIMES   = 1 << 23;
        const PATH_SYMLINK            = 1 << 24;
        const PATH_REMOVE_DIRECTORY   = 1 << 25;
        const PATH_UNLINK_FILE        = 1 << 26;
        const POLL_FD_READWRITE       = 1 << 27;
        const SOCK_SHUTDOWN           = 1 << 28;
        const SOCK_ACCEPT             = 1 << 29;
    }
}

impl Rights {
    /// Operations that apply to regular files.
    pub const REGULAR_FILE_BASE: Rights = Rights::FD_DATASYNC
        .union(Rights::FD_READ)
        .union(Rights::FD_SEEK)
        .union(Rights::FD_FDSTAT_SET_FLAGS)
        .union(Rights::FD_SYNC)
        .union(Rights::FD_TELL)
        .union(Rights::FD_WRITE)
        .union(Rights::FD_ADVISE)
        .union(Rights::FD_ALLOCATE)
        .union(Rights::FD_FILESTAT_GET)
        .union(Rights::FD_FILESTAT_SET_SIZE)
        .union(Rights::FD_FILESTAT_SET_TIMES)
        .union(Rights::POLL_FD_READWRITE);

    /// Regular files never open other descriptors.
    pub const REGULAR_FILE_INHERITING: Rights = Rights::empty();

    /// Only directory operations apply to directories.
    pub const DIRECTORY_BASE: Rights = Rights::FD_FDSTAT_SET_FLAGS
        .union(Rights::FD_SYNC)
        .union(Rights::FD_ADVISE)
        .union(Rights::PATH_CREATE_DIRECTORY)
        .union(Rights::PATH_CREATE_FILE)
        .union(Rights::PATH_LINK_SOURCE)
        .union(Rights::PATH_LINK_TARGET)
        .union(Rights::PATH_OPEN)
        .union(Rights::FD_READDIR)
        .union(Rights::PATH_READLINK)
        .union(Rights::PATH_RENAME_SOURCE)
        .union(Rights::PATH_RENAME_TARGET)
        .union(Rights::PATH_FILESTAT_GET)
        .union(Rights::PATH_FILESTAT_SET_SIZE)
        .union(Rights::PATH_FILESTAT_SET_TIMES)
        .union(Rights::FD_FILESTAT_GET)
        .union(Rights::FD_FILESTAT_SET_TIMES)
        .union(Rights::PATH_SYMLINK)
        .union(Rights::PATH_UNLINK_FILE)
        .union(Rights::PATH_REMOVE_DIRECTORY)
        .union(Rights::POLL_FD_READWRITE);

    /// Directories can yield descriptors to other directories and files.
    pub const DIRECTORY_INHERITING: Rights =
        Rights::DIRECTORY_BASE.union(Rights::REGULAR_FILE_BASE);

    /// Rights of the standard streams.
    pub const TTY_BASE: Rights = Rights::FD_READ
        .union(Rights::FD_FDSTAT_SET_FLAGS)
        .union(Rights::FD_WRITE)
        .union(Rights::FD_FILESTAT_GET)
        .union(Rights::POLL_FD_READWRITE);
}
