use crate::memory::MemoryError;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// A failed host operation.
///
/// Every recoverable failure of a typed call surfaces as this type. It carries
/// exactly one [`Errno`], looked up from the nonzero code the host returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[error("host operation failed with code {}: {kind}", .kind.raw())]
pub struct Error {
    kind: Errno,
}

impl Error {
    /// The error kind reported by the host.
    pub fn kind(&self) -> Errno {
        self.kind
    }

    /// The raw code the host returned.
    pub fn raw_code(&self) -> u16 {
        self.kind.raw()
    }
}

impl From<Errno> for Error {
    fn from(kind: Errno) -> Self {
        Error { kind }
    }
}

/// An address that does not lie in live linear memory is a bad address.
impl From<MemoryError> for Errno {
    fn from(_err: MemoryError) -> Errno {
        Errno::Fault
    }
}

impl From<MemoryError> for Error {
    fn from(err: MemoryError) -> Self {
        Errno::from(err).into()
    }
}

/// Translates a host return code. Zero is success and is never looked up.
///
/// The code space is a fixed table; a code outside of it means the host broke
/// its calling contract, which is treated like a trap.
pub(crate) fn check(code: i32) -> Result<()> {
    if code == 0 {
        return Ok(());
    }
    match u16::try_from(code).ok().and_then(Errno::from_raw) {
        Some(kind) => Err(kind.into()),
        None => panic!("host returned undefined error code {code}"),
    }
}

macro_rules! errnos {
    ($($(#[$doc:meta])* $name:ident = $code:literal, $label:literal, $msg:literal;)*) => {
        /// Error codes returned by the host, excluding success.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum Errno {
            $($(#[$doc])* $name = $code,)*
        }

        impl Errno {
            /// Looks up the kind for a nonzero code.
            pub fn from_raw(code: u16) -> Option<Errno> {
                match code {
                    $($code => Some(Errno::$name),)*
                    _ => None,
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(Errno::$name => $label,)*
                }
            }

            pub fn message(&self) -> &'static str {
                match self {
                    $(Errno::$name => $msg,)*
                }
            }
        }
    };
}

errnos! {
    /// Argument list too long.
    TooBig = 1, "2BIG", "Argument list too long";
    Acces = 2, "ACCES", "Permission denied";
    Addrinuse = 3, "ADDRINUSE", "Address in use";
    Addrnotavail = 4, "ADDRNOTAVAIL", "Address not available";
    Afnosupport = 5, "AFNOSUPPORT", "Address family not supported";
    /// Resource unavailable, or operation would block.
    Again = 6, "AGAIN", "Resource unavailable, or operation would block";
    Already = 7, "ALREADY", "Connection already in progress";
    /// Bad file descriptor.
    Badf = 8, "BADF", "Bad file descriptor";
    Badmsg = 9, "BADMSG", "Bad message";
    Busy = 10, "BUSY", "Device or resource busy";
    Canceled = 11, "CANCELED", "Operation canceled";
    Child = 12, "CHILD", "No child processes";
    Connaborted = 13, "CONNABORTED", "Connection aborted";
    Connrefused = 14, "CONNREFUSED", "Connection refused";
    Connreset = 15, "CONNRESET", "Connection reset";
    Deadlk = 16, "DEADLK", "Resource deadlock would occur";
    Destaddrreq = 17, "DESTADDRREQ", "Destination address required";
    Dom = 18, "DOM", "Mathematics argument out of domain of function";
    Dquot = 19, "DQUOT", "Reserved";
    /// File exists.
    Exist = 20, "EXIST", "File exists";
    /// Bad address. Returned when an address does not lie in linear memory.
    Fault = 21, "FAULT", "Bad address";
    Fbig = 22, "FBIG", "File too large";
    Hostunreach = 23, "HOSTUNREACH", "Host is unreachable";
    Idrm = 24, "IDRM", "Identifier removed";
    /// Illegal byte sequence.
    Ilseq = 25, "ILSEQ", "Illegal byte sequence";
    Inprogress = 26, "INPROGRESS", "Operation in progress";
    Intr = 27, "INTR", "Interrupted function";
    /// Invalid argument.
    Inval = 28, "INVAL", "Invalid argument";
    Io = 29, "IO", "I/O error";
    Isconn = 30, "ISCONN", "Socket is connected";
    /// Is a directory.
    Isdir = 31, "ISDIR", "Is a directory";
    Loop = 32, "LOOP", "Too many levels of symbolic links";
    Mfile = 33, "MFILE", "File descriptor value too large";
    Mlink = 34, "MLINK", "Too many links";
    Msgsize = 35, "MSGSIZE", "Message too large";
    Multihop = 36, "MULTIHOP", "Reserved";
    Nametoolong = 37, "NAMETOOLONG", "Filename too long";
    Netdown = 38, "NETDOWN", "Network is down";
    Netreset = 39, "NETRESET", "Connection aborted by network";
    Netunreach = 40, "NETUNREACH", "Network unreachable";
    Nfile = 41, "NFILE", "Too many files open in system";
    Nobufs = 42, "NOBUFS", "No buffer space available";
    Nodev = 43, "NODEV", "No such device";
    /// No such file or directory.
    Noent = 44, "NOENT", "No such file or directory";
    Noexec = 45, "NOEXEC", "Executable file format error";
    Nolck = 46, "NOLCK", "No locks available";
    Nolink = 47, "NOLINK", "Reserved";
    Nomem = 48, "NOMEM", "Not enough space";
    Nomsg = 49, "NOMSG", "No message of the desired type";
    Noprotoopt = 50, "NOPROTOOPT", "Protocol not available";
    Nospc = 51, "NOSPC", "No space left on device";
    Nosys = 52, "NOSYS", "Function not supported";
    Notconn = 53, "NOTCONN", "The socket is not connected";
    /// Not a directory or a symbolic link to a directory.
    Notdir = 54, "NOTDIR", "Not a directory or a symbolic link to a directory";
    Notempty = 55, "NOTEMPTY", "Directory not empty";
    Notrecoverable = 56, "NOTRECOVERABLE", "State not recoverable";
    Notsock = 57, "NOTSOCK", "Not a socket";
    Notsup = 58, "NOTSUP", "Not supported, or operation not supported on socket";
    Notty = 59, "NOTTY", "Inappropriate I/O control operation";
    Nxio = 60, "NXIO", "No such device or address";
    Overflow = 61, "OVERFLOW", "Value too large to be stored in data type";
    Ownerdead = 62, "OWNERDEAD", "Previous owner died";
    /// Operation not permitted.
    Perm = 63, "PERM", "Operation not permitted";
    Pipe = 64, "PIPE", "Broken pipe";
    Proto = 65, "PROTO", "Protocol error";
    Protonosupport = 66, "PROTONOSUPPORT", "Protocol not supported";
    Prototype = 67, "PROTOTYPE", "Protocol wrong type for socket";
    Range = 68, "RANGE", "Result too large";
    Rofs = 69, "ROFS", "Read-only file system";
    Spipe = 70, "SPIPE", "Invalid seek";
    Srch = 71, "SRCH", "No such process";
    Stale = 72, "STALE", "Reserved";
    Timedout = 73, "TIMEDOUT", "Connection timed out";
    Txtbsy = 74, "TXTBSY", "Text file busy";
    Xdev = 75, "XDEV", "Cross-device link";
    /// Extension: Capabilities insufficient.
    Notcapable = 76, "NOTCAPABLE", "Capabilities insufficient";
}

impl Errno {
    pub fn raw(&self) -> u16 {
        *self as u16
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_success() {
        assert_eq!(check(0), Ok(()));
        assert_eq!(Errno::from_raw(0), None);
    }

    #[test]
    fn table_is_dense() {
        for code in 1..=76u16 {
            let kind = Errno::from_raw(code).expect("every code up to notcapable is defined");
            assert_eq!(kind.raw(), code);
        }
        assert_eq!(Errno::from_raw(77), None);
    }

    #[test]
    fn nonzero_codes_translate() {
        assert_eq!(check(20).unwrap_err().kind(), Errno::Exist);
        assert_eq!(check(44).unwrap_err().kind(), Errno::Noent);
        assert_eq!(check(76).unwrap_err().raw_code(), 76);
    }

    #[test]
    fn display() {
        let err = Error::from(Errno::Noent);
        assert_eq!(
            err.to_string(),
            "host operation failed with code 44: NOENT: No such file or directory"
        );
    }

    #[test]
    #[should_panic(expected = "undefined error code")]
    fn undefined_code_is_fatal() {
        let _ = check(1000);
    }

    #[test]
    #[should_panic(expected = "undefined error code")]
    fn negative_code_is_fatal() {
        let _ = check(-1);
    }
}
