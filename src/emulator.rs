//! An in-process host implementing [`Abi`] over an in-memory filesystem.
//!
//! It decodes its arguments out of [`LinearMemory`] exactly like a real host
//! does, so the typed wrappers can be driven end to end off `wasm32`.
//! Descriptor numbers are drawn at random above the standard streams, and
//! rights are enforced the way a capability-based host enforces them.

use crate::abi::Abi;
use crate::config::Config;
use crate::error::Errno;
use crate::memory::{GuestAddr, LinearMemory};
use crate::types::{Fd, FdFlags, LookupFlags, OFlags, Rights};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};

type Inode = u64;

const ROOT: Inode = 0;

/// Limit on symlink expansions during a single path resolution.
const MAX_SYMLINK_EXPANSIONS: usize = 128;

enum Node {
    Dir(BTreeMap<String, Inode>),
    File(Vec<u8>),
    Symlink(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Handle {
    Stdin,
    Stdout,
    Stderr,
    Dir(Inode),
    File(Inode),
}

struct Descriptor {
    handle: Handle,
    rights_base: Rights,
    rights_inheriting: Rights,
    flags: FdFlags,
    position: usize,
}

impl Descriptor {
    fn stdio(handle: Handle) -> Descriptor {
        Descriptor {
            handle,
            rights_base: Rights::TTY_BASE,
            rights_inheriting: Rights::empty(),
            flags: FdFlags::empty(),
            position: 0,
        }
    }
}

enum Lookup {
    Existing { inode: Inode },
    Missing { parent: Inode, name: String },
}

pub struct EmulatedHost {
    nodes: HashMap<Inode, Node>,
    next_inode: Inode,
    descriptors: HashMap<u32, Descriptor>,
    rng: StdRng,
    preopen: Fd,
    stdin: Vec<u8>,
    stdin_position: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    calls: usize,
}

impl Default for EmulatedHost {
    fn default() -> Self {
        EmulatedHost::new()
    }
}

impl EmulatedHost {
    /// A host with an empty root directory, preopened with full directory
    /// rights, and randomly seeded descriptor numbering.
    pub fn new() -> EmulatedHost {
        EmulatedHost::with_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> EmulatedHost {
        EmulatedHost::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn from_config(config: &Config) -> EmulatedHost {
        match config.emulator_seed {
            Some(seed) => EmulatedHost::with_seed(seed),
            None => EmulatedHost::new(),
        }
    }

    fn with_rng(rng: StdRng) -> EmulatedHost {
        let mut host = EmulatedHost {
            nodes: HashMap::from([(ROOT, Node::Dir(BTreeMap::new()))]),
            next_inode: ROOT + 1,
            descriptors: HashMap::new(),
            rng,
            preopen: Fd::STDIN,
            stdin: Vec::new(),
            stdin_position: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
            calls: 0,
        };
        let stdio = [
            (Fd::STDIN, Handle::Stdin),
            (Fd::STDOUT, Handle::Stdout),
            (Fd::STDERR, Handle::Stderr),
        ];
        for (fd, handle) in stdio {
            host.descriptors.insert(fd.raw(), Descriptor::stdio(handle));
        }
        host.preopen =
            host.preopen_with_rights(Rights::DIRECTORY_BASE, Rights::DIRECTORY_INHERITING);
        host
    }

    /// The descriptor of the preopened root directory.
    pub fn preopen(&self) -> Fd {
        self.preopen
    }

    /// Opens another descriptor on the root directory with the given rights,
    /// bypassing the ABI.
    pub fn preopen_with_rights(&mut self, base: Rights, inheriting: Rights) -> Fd {
        let fd = self.allocate_fd();
        self.descriptors.insert(
            fd,
            Descriptor {
                handle: Handle::Dir(ROOT),
                rights_base: base,
                rights_inheriting: inheriting,
                flags: FdFlags::empty(),
                position: 0,
            },
        );
        Fd::from(fd)
    }

    pub fn push_stdin(&mut self, data: &[u8]) {
        self.stdin.extend_from_slice(data);
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// Number of host calls made through the ABI so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn open_descriptors(&self) -> Vec<Fd> {
        let mut fds = self.descriptors.keys().copied().map(Fd::from).collect::<Vec<_>>();
        fds.sort();
        fds
    }

    /// Base and inheriting rights of an open descriptor.
    pub fn rights(&self, fd: Fd) -> Option<(Rights, Rights)> {
        self.descriptors
            .get(&fd.raw())
            .map(|d| (d.rights_base, d.rights_inheriting))
    }

    /// Contents of the regular file at `path`, relative to the root.
    pub fn file_contents(&self, path: &str) -> Option<&[u8]> {
        match self.lookup(ROOT, path, true) {
            Ok(Lookup::Existing { inode }) => match &self.nodes[&inode] {
                Node::File(data) => Some(data.as_slice()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(
            self.lookup(ROOT, path, true),
            Ok(Lookup::Existing { inode }) if matches!(self.nodes[&inode], Node::Dir(_))
        )
    }

    /// Creates or replaces the regular file at `path`, relative to the root.
    pub fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<(), Errno> {
        match self.lookup(ROOT, path, true)? {
            Lookup::Existing { inode } => match self.nodes.get_mut(&inode) {
                Some(Node::File(data)) => {
                    *data = contents.to_vec();
                    Ok(())
                }
                _ => Err(Errno::Isdir),
            },
            Lookup::Missing { parent, name } => {
                self.link(parent, name, Node::File(contents.to_vec()));
                Ok(())
            }
        }
    }

    /// Creates a symbolic link at `path`, relative to the root, pointing at
    /// `target`.
    pub fn symlink(&mut self, path: &str, target: &str) -> Result<(), Errno> {
        match self.lookup(ROOT, path, false)? {
            Lookup::Existing { .. } => Err(Errno::Exist),
            Lookup::Missing { parent, name } => {
                self.link(parent, name, Node::Symlink(target.to_string()));
                Ok(())
            }
        }
    }

    fn allocate_fd(&mut self) -> u32 {
        loop {
            let candidate = self.rng.gen_range(Fd::FIRST_NON_STDIO..=i32::MAX as u32);
            if !self.descriptors.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn link(&mut self, parent: Inode, name: String, node: Node) -> Inode {
        let inode = self.next_inode;
        self.next_inode += 1;
        self.nodes.insert(inode, node);
        if let Some(Node::Dir(entries)) = self.nodes.get_mut(&parent) {
            entries.insert(name, inode);
        }
        inode
    }

    fn descriptor(&self, fd: i32, needed_base: Rights) -> Result<&Descriptor, Errno> {
        let desc = u32::try_from(fd)
            .ok()
            .and_then(|fd| self.descriptors.get(&fd))
            .ok_or(Errno::Badf)?;
        if !desc.rights_base.contains(needed_base) {
            return Err(Errno::Notcapable);
        }
        Ok(desc)
    }

    /// Looks up a directory descriptor holding `needed_base` and allowing
    /// `needed_inheriting` on what is opened through it.
    fn directory(
        &self,
        fd: i32,
        needed_base: Rights,
        needed_inheriting: Rights,
    ) -> Result<(Inode, Rights), Errno> {
        let desc = self.descriptor(fd, Rights::empty())?;
        let Handle::Dir(inode) = desc.handle else {
            return Err(Errno::Notdir);
        };
        if !desc.rights_base.contains(needed_base)
            || !desc.rights_inheriting.contains(needed_inheriting)
        {
            return Err(Errno::Notcapable);
        }
        Ok((inode, desc.rights_inheriting))
    }

    /// Resolves `path` relative to the directory `base`.
    ///
    /// Intermediate symlinks are always expanded, the final one only when
    /// `follow` is set. Resolution never leaves `base`: absolute paths, `..`
    /// past `base` and absolute symlink targets are all `Notcapable`.
    fn lookup(&self, base: Inode, path: &str, follow: bool) -> Result<Lookup, Errno> {
        if path.is_empty() {
            return Err(Errno::Noent);
        }
        let mut dir_stack = vec![base];
        let mut path_stack = components(path)?;
        let mut symlink_expansions = 0;

        while let Some(component) = path_stack.pop() {
            let is_final = path_stack.is_empty();
            let dir = *dir_stack.last().expect("dir_stack is never empty");
            match component.as_str() {
                "." => {}
                ".." => {
                    dir_stack.pop();
                    if dir_stack.is_empty() {
                        return Err(Errno::Notcapable);
                    }
                }
                name => {
                    let Some(Node::Dir(entries)) = self.nodes.get(&dir) else {
                        return Err(Errno::Notdir);
                    };
                    let Some(&inode) = entries.get(name) else {
                        if is_final {
                            return Ok(Lookup::Missing {
                                parent: dir,
                                name: name.to_string(),
                            });
                        }
                        return Err(Errno::Noent);
                    };
                    match &self.nodes[&inode] {
                        Node::Symlink(target) if !is_final || follow => {
                            symlink_expansions += 1;
                            if symlink_expansions > MAX_SYMLINK_EXPANSIONS {
                                return Err(Errno::Loop);
                            }
                            path_stack.extend(components(target)?);
                        }
                        Node::Dir(_) if !is_final => dir_stack.push(inode),
                        _ if !is_final => return Err(Errno::Notdir),
                        _ => return Ok(Lookup::Existing { inode }),
                    }
                    continue;
                }
            }
            if is_final {
                let inode = *dir_stack.last().expect("dir_stack is never empty");
                return Ok(Lookup::Existing { inode });
            }
        }
        // Only an empty symlink target drains the stack without a final entry.
        Err(Errno::Noent)
    }

    fn fd_write_impl(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        nwritten: i32,
    ) -> Result<(), Errno> {
        let iovs = memory.dec_iovec_slice(GuestAddr::from_abi(iovs), iovs_len as u32)?;
        let mut data = Vec::new();
        for (buf, buf_len) in iovs {
            data.extend_from_slice(memory.read(buf, buf_len)?);
        }

        let desc = self.descriptor(fd, Rights::FD_WRITE)?;
        let (handle, append, position) = (
            desc.handle,
            desc.flags.contains(FdFlags::APPEND),
            desc.position,
        );
        let new_position = match handle {
            Handle::Stdout => {
                self.stdout.extend_from_slice(&data);
                0
            }
            Handle::Stderr => {
                self.stderr.extend_from_slice(&data);
                0
            }
            Handle::File(inode) => {
                let Some(Node::File(contents)) = self.nodes.get_mut(&inode) else {
                    return Err(Errno::Badf);
                };
                let start = if append { contents.len() } else { position };
                let end = start + data.len();
                if contents.len() < end {
                    contents.resize(end, 0);
                }
                contents[start..end].copy_from_slice(&data);
                end
            }
            Handle::Stdin | Handle::Dir(_) => return Err(Errno::Badf),
        };
        if let Some(desc) = self.descriptors.get_mut(&(fd as u32)) {
            desc.position = new_position;
        }
        memory.enc_u32(GuestAddr::from_abi(nwritten), data.len() as u32)?;
        Ok(())
    }

    fn fd_read_impl(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        nread: i32,
    ) -> Result<(), Errno> {
        let iovs = memory.dec_iovec_slice(GuestAddr::from_abi(iovs), iovs_len as u32)?;
        let desc = self.descriptor(fd, Rights::FD_READ)?;
        let (handle, position) = (desc.handle, desc.position);
        let available: &[u8] = match handle {
            Handle::Stdin => &self.stdin[self.stdin_position..],
            Handle::File(inode) => match &self.nodes[&inode] {
                Node::File(contents) => contents.get(position..).unwrap_or(&[]),
                _ => return Err(Errno::Badf),
            },
            Handle::Stdout | Handle::Stderr | Handle::Dir(_) => return Err(Errno::Badf),
        };

        let mut total = 0;
        for (buf, buf_len) in iovs {
            let chunk = &available[total..];
            let n = chunk.len().min(buf_len as usize);
            memory.write(buf, &chunk[..n])?;
            total += n;
        }

        match handle {
            Handle::Stdin => self.stdin_position += total,
            _ => {
                if let Some(desc) = self.descriptors.get_mut(&(fd as u32)) {
                    desc.position += total;
                }
            }
        }
        memory.enc_u32(GuestAddr::from_abi(nread), total as u32)?;
        Ok(())
    }

    fn fd_close_impl(&mut self, fd: i32) -> Result<(), Errno> {
        let fd = u32::try_from(fd).map_err(|_| Errno::Badf)?;
        self.descriptors.remove(&fd).map(drop).ok_or(Errno::Badf)
    }

    fn path_create_directory_impl(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        path: i32,
        path_len: i32,
    ) -> Result<(), Errno> {
        let path = read_path(memory, path, path_len)?;
        let (dir, _) = self.directory(
            fd,
            Rights::PATH_OPEN | Rights::PATH_CREATE_DIRECTORY,
            Rights::empty(),
        )?;
        match self.lookup(dir, &path, false)? {
            Lookup::Existing { .. } => Err(Errno::Exist),
            Lookup::Missing { parent, name } => {
                self.link(parent, name, Node::Dir(BTreeMap::new()));
                Ok(())
            }
        }
    }

    fn path_open_impl(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        dirflags: i32,
        path: i32,
        path_len: i32,
        oflags: i32,
        fs_rights_base: i64,
        fs_rights_inheriting: i64,
        fdflags: i32,
        opened_fd: i32,
    ) -> Result<(), Errno> {
        let dirflags = LookupFlags::from_bits(dirflags as u32).ok_or(Errno::Inval)?;
        let oflags = u16::try_from(oflags)
            .ok()
            .and_then(OFlags::from_bits)
            .ok_or(Errno::Inval)?;
        let fdflags = u16::try_from(fdflags)
            .ok()
            .and_then(FdFlags::from_bits)
            .ok_or(Errno::Inval)?;
        let fs_rights_base = Rights::from_bits(fs_rights_base as u64).ok_or(Errno::Inval)?;
        let fs_rights_inheriting =
            Rights::from_bits(fs_rights_inheriting as u64).ok_or(Errno::Inval)?;
        let path = read_path(memory, path, path_len)?;

        // which rights are needed on the dirfd?
        let mut needed_base = Rights::PATH_OPEN;
        let mut needed_inheriting = Rights::empty();
        if oflags.contains(OFlags::CREAT) {
            needed_base |= Rights::PATH_CREATE_FILE;
        }
        if oflags.contains(OFlags::TRUNC) {
            needed_inheriting |= Rights::PATH_FILESTAT_SET_SIZE;
        }
        let (dir, grantable) = self.directory(fd, needed_base, needed_inheriting)?;

        let must_be_dir = oflags.contains(OFlags::DIRECTORY) || path.ends_with('/');
        // a trailing slash names the directory a final symlink points to
        let follow = dirflags.contains(LookupFlags::SYMLINK_FOLLOW) || path.ends_with('/');
        let handle = match self.lookup(dir, &path, follow)? {
            Lookup::Existing { inode } => {
                if oflags.contains(OFlags::CREAT | OFlags::EXCL) {
                    return Err(Errno::Exist);
                }
                match self.nodes.get_mut(&inode) {
                    Some(Node::Dir(_)) if oflags.contains(OFlags::TRUNC) => {
                        return Err(Errno::Isdir);
                    }
                    Some(Node::Dir(_)) => Handle::Dir(inode),
                    Some(Node::File(_)) if must_be_dir => return Err(Errno::Notdir),
                    Some(Node::File(contents)) => {
                        if oflags.contains(OFlags::TRUNC) {
                            contents.clear();
                        }
                        Handle::File(inode)
                    }
                    // the final component is a symlink that was not followed
                    Some(Node::Symlink(_)) | None => return Err(Errno::Loop),
                }
            }
            Lookup::Missing { parent, name } => {
                if !oflags.contains(OFlags::CREAT) {
                    return Err(Errno::Noent);
                }
                if must_be_dir {
                    return Err(Errno::Inval);
                }
                Handle::File(self.link(parent, name, Node::File(Vec::new())))
            }
        };

        let (max_base, max_inheriting) = match handle {
            Handle::Dir(_) => (Rights::DIRECTORY_BASE, Rights::DIRECTORY_INHERITING),
            _ => (Rights::REGULAR_FILE_BASE, Rights::REGULAR_FILE_INHERITING),
        };
        let new_fd = self.allocate_fd();
        self.descriptors.insert(
            new_fd,
            Descriptor {
                handle,
                rights_base: fs_rights_base & grantable & max_base,
                rights_inheriting: fs_rights_inheriting & grantable & max_inheriting,
                flags: fdflags,
                position: 0,
            },
        );
        if let Err(e) = memory.enc_u32(GuestAddr::from_abi(opened_fd), new_fd) {
            self.descriptors.remove(&new_fd);
            return Err(e.into());
        }
        tracing::trace!(new_fd, "opened descriptor");
        Ok(())
    }
}

/// Splits a relative path into a stack of components, last component first.
fn components(path: &str) -> Result<Vec<String>, Errno> {
    if path.starts_with('/') {
        return Err(Errno::Notcapable);
    }
    Ok(path
        .split('/')
        .filter(|c| !c.is_empty())
        .rev()
        .map(str::to_string)
        .collect())
}

fn read_path(memory: &LinearMemory, path: i32, path_len: i32) -> Result<String, Errno> {
    let bytes = memory.read(GuestAddr::from_abi(path), path_len as u32)?;
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| Errno::Ilseq)
}

fn encode(call: &str, result: Result<(), Errno>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(errno) => {
            tracing::trace!(call, errno = errno.name(), "host call failed");
            i32::from(errno.raw())
        }
    }
}

impl Abi for EmulatedHost {
    fn fd_write(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        nwritten: i32,
    ) -> i32 {
        self.calls += 1;
        tracing::trace!(fd, iovs, iovs_len, nwritten, "fd_write");
        let result = self.fd_write_impl(memory, fd, iovs, iovs_len, nwritten);
        encode("fd_write", result)
    }

    fn fd_read(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        nread: i32,
    ) -> i32 {
        self.calls += 1;
        tracing::trace!(fd, iovs, iovs_len, nread, "fd_read");
        let result = self.fd_read_impl(memory, fd, iovs, iovs_len, nread);
        encode("fd_read", result)
    }

    fn fd_close(&mut self, _memory: &mut LinearMemory, fd: i32) -> i32 {
        self.calls += 1;
        tracing::trace!(fd, "fd_close");
        let result = self.fd_close_impl(fd);
        encode("fd_close", result)
    }

    fn path_create_directory(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        path: i32,
        path_len: i32,
    ) -> i32 {
        self.calls += 1;
        tracing::trace!(fd, path, path_len, "path_create_directory");
        let result = self.path_create_directory_impl(memory, fd, path, path_len);
        encode("path_create_directory", result)
    }

    fn path_open(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        dirflags: i32,
        path: i32,
        path_len: i32,
        oflags: i32,
        fs_rights_base: i64,
        fs_rights_inheriting: i64,
        fdflags: i32,
        opened_fd: i32,
    ) -> i32 {
        self.calls += 1;
        tracing::trace!(fd, dirflags, path, path_len, oflags, fdflags, "path_open");
        let result = self.path_open_impl(
            memory,
            fd,
            dirflags,
            path,
            path_len,
            oflags,
            fs_rights_base,
            fs_rights_inheriting,
            fdflags,
            opened_fd,
        );
        encode("path_open", result)
    }
}
