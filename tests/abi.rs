//! Drives the typed wrappers against a scripted host that records the raw
//! arguments it receives.

use wasi_scoped_calls::{
    Abi, Config, Errno, Fd, FdFlags, GuestAddr, LinearMemory, LookupFlags, OFlags, Rights,
    Syscalls,
};

#[derive(Debug, Default)]
struct Recorded {
    fd: i32,
    path: Vec<u8>,
    args: Vec<i64>,
}

/// Returns `code` from every call. On success it also writes `output` to the
/// call's output slot; on failure it writes `output` anyway, which callers
/// must ignore.
struct Scripted {
    code: i32,
    output: u32,
    last: Recorded,
}

impl Scripted {
    fn new(code: i32, output: u32) -> Scripted {
        Scripted {
            code,
            output,
            last: Recorded::default(),
        }
    }

    fn syscalls(code: i32, output: u32) -> Syscalls<Scripted> {
        Syscalls::new(Scripted::new(code, output), &Config::default()).unwrap()
    }
}

impl Abi for Scripted {
    fn fd_write(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        nwritten: i32,
    ) -> i32 {
        let mut path = Vec::new();
        for (buf, len) in memory
            .dec_iovec_slice(GuestAddr::from_abi(iovs), iovs_len as u32)
            .unwrap()
        {
            path.extend_from_slice(memory.read(buf, len).unwrap());
        }
        self.last = Recorded {
            fd,
            path,
            args: vec![i64::from(iovs_len)],
        };
        memory
            .enc_u32(GuestAddr::from_abi(nwritten), self.output)
            .unwrap();
        self.code
    }

    fn fd_read(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        nread: i32,
    ) -> i32 {
        let iovs = memory
            .dec_iovec_slice(GuestAddr::from_abi(iovs), iovs_len as u32)
            .unwrap();
        for (buf, len) in iovs {
            memory.write(buf, &vec![b'r'; len as usize]).unwrap();
        }
        self.last = Recorded {
            fd,
            path: Vec::new(),
            args: vec![i64::from(iovs_len)],
        };
        memory.enc_u32(GuestAddr::from_abi(nread), self.output).unwrap();
        self.code
    }

    fn fd_close(&mut self, _memory: &mut LinearMemory, fd: i32) -> i32 {
        self.last = Recorded {
            fd,
            ..Recorded::default()
        };
        self.code
    }

    fn path_create_directory(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        path: i32,
        path_len: i32,
    ) -> i32 {
        self.last = Recorded {
            fd,
            path: memory
                .read(GuestAddr::from_abi(path), path_len as u32)
                .unwrap()
                .to_vec(),
            args: Vec::new(),
        };
        self.code
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
        self.last = Recorded {
            fd,
            path: memory
                .read(GuestAddr::from_abi(path), path_len as u32)
                .unwrap()
                .to_vec(),
            args: vec![
                i64::from(dirflags),
                i64::from(oflags),
                fs_rights_base,
                fs_rights_inheriting,
                i64::from(fdflags),
            ],
        };
        memory
            .enc_u32(GuestAddr::from_abi(opened_fd), self.output)
            .unwrap();
        self.code
    }
}

#[test_log::test]
fn open_marshals_every_argument() {
    let mut sys = Scripted::syscalls(0, 42);
    let fd = sys
        .open(
            Fd::from_raw(7),
            LookupFlags::SYMLINK_FOLLOW,
            "dir/file.txt",
            OFlags::CREAT | OFlags::TRUNC,
            Rights::FD_READ | Rights::FD_WRITE,
            Rights::FD_SEEK,
            FdFlags::APPEND | FdFlags::SYNC,
        )
        .unwrap();
    assert_eq!(fd, Fd::from_raw(42));

    let last = &sys.abi().last;
    assert_eq!(last.fd, 7);
    assert_eq!(last.path, b"dir/file.txt");
    assert_eq!(last.args, vec![1, 0b1001, 0b100_0010, 0b100, 0b1_0001]);
    assert_eq!(sys.memory().in_use(), 0);
}

#[test_log::test]
fn failures_never_read_the_output_slot() {
    let mut sys = Scripted::syscalls(i32::from(Errno::Acces.raw()), 42);
    let err = sys
        .open(
            Fd::from_raw(3),
            LookupFlags::empty(),
            "x",
            OFlags::empty(),
            Rights::empty(),
            Rights::empty(),
            FdFlags::empty(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), Errno::Acces);
    assert_eq!(err.raw_code(), 2);

    let err = sys.write(Fd::STDOUT, &[b"abc"]).unwrap_err();
    assert_eq!(err.kind(), Errno::Acces);
    assert_eq!(sys.memory().in_use(), 0);
}

#[test_log::test]
fn create_directory_sends_exact_path_bytes() {
    let mut sys = Scripted::syscalls(0, 0);
    sys.create_directory(Fd::from_raw(5), "héllo/wörld").unwrap();
    assert_eq!(sys.abi().last.fd, 5);
    assert_eq!(sys.abi().last.path, "héllo/wörld".as_bytes());

    sys.create_directory(Fd::from_raw(5), "").unwrap();
    assert!(sys.abi().last.path.is_empty());
}

#[test_log::test]
fn write_reports_host_count() {
    // a short write is reported as-is
    let mut sys = Scripted::syscalls(0, 2);
    assert_eq!(sys.write(Fd::STDERR, &[b"ab", b"cd"]).unwrap(), 2);
    assert_eq!(sys.abi().last.path, b"abcd");
    assert_eq!(sys.abi().last.args, vec![2]);

    assert_eq!(sys.write(Fd::STDERR, &[]).unwrap(), 2);
    assert_eq!(sys.abi().last.args, vec![0]);
}

#[test_log::test]
fn read_copies_only_what_was_read() {
    let mut sys = Scripted::syscalls(0, 5);
    let mut a = [0u8; 3];
    let mut b = [0u8; 4];
    assert_eq!(sys.read(Fd::STDIN, &mut [&mut a, &mut b]).unwrap(), 5);
    assert_eq!(&a, b"rrr");
    assert_eq!(&b, b"rr\0\0");
}

#[test_log::test]
fn close_passes_descriptor() {
    let mut sys = Scripted::syscalls(i32::from(Errno::Badf.raw()), 0);
    assert_eq!(sys.close(Fd::from_raw(99)).unwrap_err().kind(), Errno::Badf);
    assert_eq!(sys.abi().last.fd, 99);
}

#[test]
#[should_panic(expected = "undefined error code")]
fn undefined_host_code_is_fatal() {
    let mut sys = Scripted::syscalls(500, 0);
    let _ = sys.close(Fd::STDOUT);
}
