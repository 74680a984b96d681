//! The integer-only calling convention of the host's `wasi_snapshot_preview1`
//! module.
//!
//! Every function here mirrors one host import exactly: argument order, widths
//! and count. Addresses and lengths are passed as `i32`, rights as `i64`, and
//! the result is the raw status code. Nothing is validated at this layer.
//!
//! The host reads and writes linear memory on its own. The memory is passed
//! along so that hosts living in the same process, such as
//! [`crate::emulator::EmulatedHost`], can reach it; the real imports ignore it.

use crate::memory::LinearMemory;

pub trait Abi {
    fn fd_write(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        nwritten: i32,
    ) -> i32;

    fn fd_read(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        nread: i32,
    ) -> i32;

    fn fd_close(&mut self, memory: &mut LinearMemory, fd: i32) -> i32;

    fn path_create_directory(
        &mut self,
        memory: &mut LinearMemory,
        fd: i32,
        path: i32,
        path_len: i32,
    ) -> i32;

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
    ) -> i32;
}

#[cfg(target_arch = "wasm32")]
pub use self::wasm::WasiImports;

#[cfg(target_arch = "wasm32")]
mod wasm {
    use super::Abi;
    use crate::memory::LinearMemory;

    mod raw {
        #[link(wasm_import_module = "wasi_snapshot_preview1")]
        unsafe extern "C" {
            #[link_name = "fd_write"]
            pub fn fd_write(arg0: i32, arg1: i32, arg2: i32, arg3: i32) -> i32;
            #[link_name = "fd_read"]
            pub fn fd_read(arg0: i32, arg1: i32, arg2: i32, arg3: i32) -> i32;
            #[link_name = "fd_close"]
            pub fn fd_close(arg0: i32) -> i32;
            #[link_name = "path_create_directory"]
            pub fn path_create_directory(arg0: i32, arg1: i32, arg2: i32) -> i32;
            #[link_name = "path_open"]
            pub fn path_open(
                arg0: i32,
                arg1: i32,
                arg2: i32,
                arg3: i32,
                arg4: i32,
                arg5: i64,
                arg6: i64,
                arg7: i32,
                arg8: i32,
            ) -> i32;
        }
    }

    /// The host's real imports. Addresses must come from a
    /// [`LinearMemory::in_process`] region.
    #[derive(Debug, Default)]
    pub struct WasiImports;

    impl Abi for WasiImports {
        fn fd_write(
            &mut self,
            _memory: &mut LinearMemory,
            fd: i32,
            iovs: i32,
            iovs_len: i32,
            nwritten: i32,
        ) -> i32 {
            unsafe { raw::fd_write(fd, iovs, iovs_len, nwritten) }
        }

        fn fd_read(
            &mut self,
            _memory: &mut LinearMemory,
            fd: i32,
            iovs: i32,
            iovs_len: i32,
            nread: i32,
        ) -> i32 {
            unsafe { raw::fd_read(fd, iovs, iovs_len, nread) }
        }

        fn fd_close(&mut self, _memory: &mut LinearMemory, fd: i32) -> i32 {
            unsafe { raw::fd_close(fd) }
        }

        fn path_create_directory(
            &mut self,
            _memory: &mut LinearMemory,
            fd: i32,
            path: i32,
            path_len: i32,
        ) -> i32 {
            unsafe { raw::path_create_directory(fd, path, path_len) }
        }

        fn path_open(
            &mut self,
            _memory: &mut LinearMemory,
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
            unsafe {
                raw::path_open(
                    fd,
                    dirflags,
                    path,
                    path_len,
                    oflags,
                    fs_rights_base,
                    fs_rights_inheriting,
                    fdflags,
                    opened_fd,
                )
            }
        }
    }
}
