use std::fmt;
use std::io;

/// Classification of a fatal transport failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    Resolve,
    WriteZero,
    Io(io::ErrorKind),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Resolve => write!(f, "address resolution failed"),
            ErrorKind::WriteZero => write!(f, "peer accepted zero bytes"),
            ErrorKind::Io(kind) => write!(f, "io error: {:?}", kind),
        }
    }
}

/// Outcome classification for every operation the engine initiates.
///
/// `Wait` covers would-block and operation-pending conditions and is never
/// surfaced. `Benign` covers error kinds the initiating call site declared
/// harmless. Everything else is `Fatal` and lands on the owning entity.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Benign(io::ErrorKind),
    Fatal(ErrorKind),
}

pub type NetworkResult<T> = Result<T, NetworkError>;

impl From<io::Error> for NetworkError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorKind::Io(kind)),
        }
    }
}

/// Folds an io result into the engine taxonomy using the caller's benign
/// whitelist.
#[inline]
pub fn classify<T>(result: io::Result<T>, benign: &[io::ErrorKind]) -> NetworkResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) => match err.kind() {
            io::ErrorKind::WouldBlock => Err(NetworkError::Wait),
            kind if benign.contains(&kind) => Err(NetworkError::Benign(kind)),
            kind => Err(NetworkError::Fatal(ErrorKind::Io(kind))),
        },
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    /// True only for fatal outcomes; `Wait` and `Benign` are part of the
    /// normal machinery.
    #[inline]
    fn has_failed(&self) -> bool {
        matches!(self, Err(NetworkError::Fatal(_)))
    }
}
