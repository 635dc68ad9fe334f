//! Error kinds and the thread-local "last errno" shadow for callers
//! that only have a kind and need the underlying OS error.

use std::cell::Cell;
use std::error::Error as StdError;
use std::fmt;
use std::io;

thread_local! {
    static LAST_ERRNO: Cell<i32> = Cell::new(0);
}

/// The different kinds of errors that can occur while manipulating
/// control groups.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ErrorKind {
    /// Cgroup support is not compiled in.
    NotCompiled,
    /// No cgroup filesystem is mounted.
    NotMounted,
    /// The requested cgroup does not exist.
    NotExists,
    /// The cgroup has not been created.
    NotCreated,
    /// One of the needed subsystems is not mounted.
    SubsysNotMounted,
    /// The request came from a non-owner.
    NotOwner,
    /// Controllers are bound to different mount points.
    ControllersSplit,
    /// The operation is not allowed.
    NotAllowed,
    /// The value to set exceeds the maximum.
    ValueExceedsMax,
    /// The controller already exists.
    ControllerExists,
    /// The value already exists.
    ValueExists,
    /// The requested operation is invalid.
    InvalidOp,
    /// Creation of the controller failed.
    ControllerCreateFailed,
    /// A generic operation failure.
    Fail,
    /// The library has not been initialized.
    NotInitialized,
    /// Tried to set a value for a control that does not exist.
    ValueNotExist,
    /// An error whose cause is an underlying OS error.
    Other,
    /// Values are not equal.
    ValuesNotEqual,
    /// Controllers are different.
    ControllersDifferent,
    /// Parsing the rules configuration failed.
    ParseFailed,
    /// The rules configuration file does not exist.
    RulesNoFile,
    /// Mounting a cgroup filesystem failed.
    MountFailed,
    /// The configuration file could not be opened.
    ConfigOpenFailed,
    /// End of file / end of iterator.
    Eof,
}

impl ErrorKind {
    fn message(&self) -> &'static str {
        match self {
            ErrorKind::NotCompiled => "Cgroup is not compiled in",
            ErrorKind::NotMounted => "Cgroup is not mounted",
            ErrorKind::NotExists => "Cgroup does not exist",
            ErrorKind::NotCreated => "Cgroup has not been created",
            ErrorKind::SubsysNotMounted => "Cgroup one of the needed subsystems is not mounted",
            ErrorKind::NotOwner => "Cgroup, request came in from non owner",
            ErrorKind::ControllersSplit => {
                "Cgroup controllers controllers are bound to different mount points"
            }
            ErrorKind::NotAllowed => "Cgroup, operation not allowed",
            ErrorKind::ValueExceedsMax => "Cgroup value set exceeds maximum",
            ErrorKind::ControllerExists => "Cgroup controller already exists",
            ErrorKind::ValueExists => "Cgroup value already exists",
            ErrorKind::InvalidOp => "Cgroup invalid operation",
            ErrorKind::ControllerCreateFailed => "Cgroup, creation of controller failed",
            ErrorKind::Fail => "Cgroup operation failed",
            ErrorKind::NotInitialized => "Cgroup not initialized",
            ErrorKind::ValueNotExist => {
                "Cgroup trying to set value for control that does not exist"
            }
            ErrorKind::Other => "Cgroup generic error",
            ErrorKind::ValuesNotEqual => "Cgroup values are not equal",
            ErrorKind::ControllersDifferent => "Cgroup controllers are different",
            ErrorKind::ParseFailed => "Cgroup parsing failed",
            ErrorKind::RulesNoFile => "Cgroup, rules file does not exist",
            ErrorKind::MountFailed => "Cgroup mounting failed",
            ErrorKind::ConfigOpenFailed => "The config file can not be opened",
            ErrorKind::Eof => "End of File or iterator",
        }
    }
}

/// An error produced by this crate.
///
/// Splits a stable `ErrorKind` from an optional underlying cause: when
/// `kind` is `Other`, `cause` (if present) is the OS error that
/// triggered it, and its errno is also mirrored into a thread-local
/// cell so callers using the kind-only surface (`Error::last_errno`)
/// can still retrieve it.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    cause: Option<io::Error>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error { kind, cause: None }
    }

    pub fn with_cause(kind: ErrorKind, cause: io::Error) -> Self {
        if let Some(errno) = cause.raw_os_error() {
            LAST_ERRNO.with(|c| c.set(errno));
        }
        Error {
            kind,
            cause: Some(cause),
        }
    }

    /// Wraps an `io::Error` as `ErrorKind::Other`, remembering its
    /// errno in the thread-local shadow.
    pub fn from_io(cause: io::Error) -> Self {
        Error::with_cause(ErrorKind::Other, cause)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn cause(&self) -> Option<&io::Error> {
        self.cause.as_ref()
    }

    /// The last OS errno captured on this thread by an `Other`-kinded
    /// error.
    pub fn last_errno() -> i32 {
        LAST_ERRNO.with(|c| c.get())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.kind == ErrorKind::Other {
            if let Some(cause) = &self.cause {
                return write!(f, "{}: {}", self.kind.message(), cause);
            }
            let errno = Error::last_errno();
            if errno != 0 {
                return write!(f, "{}: errno {}", self.kind.message(), errno);
            }
        }
        write!(f, "{}", self.kind.message())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::from_io(e)
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

/// Translates an `ErrorKind` into its stable message.
pub fn strerror(kind: ErrorKind) -> &'static str {
    kind.message()
}
