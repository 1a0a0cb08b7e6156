/*!
Specialized `Error` and `Result` types for memscope.
*/

use std::{error, fmt, result, str};

use log::{debug, error, info, trace, warn};

/// Error type used throughout memscope.
///
/// The first field describes where the error originated, the second one what went wrong.
/// Both are plain enums so errors can be copied around and compared freely.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Error(pub ErrorOrigin, pub ErrorKind);

impl Error {
    /// Returns a static string representing the type of error.
    pub fn as_str(&self) -> &'static str {
        self.1.to_str()
    }

    /// Returns a static string representing the type of error.
    pub fn into_str(self) -> &'static str {
        self.as_str()
    }

    /// Returns the origin of this error.
    pub fn origin(&self) -> ErrorOrigin {
        self.0
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.1
    }

    pub fn log_error(self, err: impl fmt::Display) -> Self {
        error!("{}: {} ({})", self.0.to_str(), self.1.to_str(), err);
        self
    }

    pub fn log_warn(self, err: impl fmt::Display) -> Self {
        warn!("{}: {} ({})", self.0.to_str(), self.1.to_str(), err);
        self
    }

    pub fn log_info(self, err: impl fmt::Display) -> Self {
        info!("{}: {} ({})", self.0.to_str(), self.1.to_str(), err);
        self
    }

    pub fn log_debug(self, err: impl fmt::Display) -> Self {
        debug!("{}: {} ({})", self.0.to_str(), self.1.to_str(), err);
        self
    }

    pub fn log_trace(self, err: impl fmt::Display) -> Self {
        trace!("{}: {} ({})", self.0.to_str(), self.1.to_str(), err);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.0.to_str(), self.1.to_str())
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        self.as_str()
    }
}

/// Convert from str::Utf8Error
impl From<str::Utf8Error> for Error {
    fn from(_err: str::Utf8Error) -> Self {
        Error(ErrorOrigin::Other, ErrorKind::Encoding)
    }
}

#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorOrigin {
    Memory,

    OsLayer,
    Image,
    Regions,
    Heaps,
    Threads,

    Rtti,
    Version,
    Context,

    Other,
}

impl ErrorOrigin {
    /// Returns a static string representing the type of error.
    pub fn to_str(self) -> &'static str {
        match self {
            ErrorOrigin::Memory => "memory",

            ErrorOrigin::OsLayer => "oslayer",
            ErrorOrigin::Image => "image",
            ErrorOrigin::Regions => "regions",
            ErrorOrigin::Heaps => "heaps",
            ErrorOrigin::Threads => "threads",

            ErrorOrigin::Rtti => "rtti",
            ErrorOrigin::Version => "version",
            ErrorOrigin::Context => "context",

            ErrorOrigin::Other => "other",
        }
    }
}

#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Uninitialized,
    NotSupported,
    Configuration,

    NotFound,
    OutOfBounds,
    Encoding,

    UnableToReadFile,

    UnableToReadMemory,
    UnableToWriteMemory,

    ProcessNotFound,
    ModuleNotFound,
    ThreadNotFound,
    UnableToOpenThread,
    UnableToCreateSnapshot,
    UnableToQueryHeaps,

    InvalidExeFile,
    InvalidRttiChain,
}

impl ErrorKind {
    /// Returns a static string representing the type of error.
    pub fn to_str(self) -> &'static str {
        match self {
            ErrorKind::Uninitialized => "uninitialized",
            ErrorKind::NotSupported => "not supported",
            ErrorKind::Configuration => "configuration error",

            ErrorKind::NotFound => "not found",
            ErrorKind::OutOfBounds => "out of bounds",
            ErrorKind::Encoding => "encoding error",

            ErrorKind::UnableToReadFile => "unable to read file",

            ErrorKind::UnableToReadMemory => "unable to read memory",
            ErrorKind::UnableToWriteMemory => "unable to write memory",

            ErrorKind::ProcessNotFound => "process not found",
            ErrorKind::ModuleNotFound => "module not found",
            ErrorKind::ThreadNotFound => "thread not found",
            ErrorKind::UnableToOpenThread => "unable to open thread",
            ErrorKind::UnableToCreateSnapshot => "unable to create snapshot",
            ErrorKind::UnableToQueryHeaps => "unable to query heaps",

            ErrorKind::InvalidExeFile => "invalid exe file",
            ErrorKind::InvalidRttiChain => "invalid rtti chain",
        }
    }
}

/// Specialized `Result` type for memscope results.
pub type Result<T> = result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = Error(ErrorOrigin::Image, ErrorKind::InvalidExeFile);
        assert_eq!(err.to_string(), "image: invalid exe file");
        assert_eq!(err.as_str(), "invalid exe file");
    }

    #[test]
    fn log_passthrough() {
        let err = Error(ErrorOrigin::Threads, ErrorKind::UnableToOpenThread).log_warn("0x1234");
        assert_eq!(err.origin(), ErrorOrigin::Threads);
        assert_eq!(err.kind(), ErrorKind::UnableToOpenThread);
    }
}
