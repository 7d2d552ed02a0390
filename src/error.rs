// Crate-wide error taxonomy shared by every content-pipeline subsystem.
//
// Mirrors `drivers::storage`'s `Result<_, &'static str>` convention but
// carries a `kind` alongside the message so callers can branch (retry,
// invalidate-and-rebuild, protocol teardown) without string matching.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // I/O
    NotFound,
    IOError,
    Timeout,
    Disconnected,
    // Parse
    InvalidFormat,
    ParseFailed,
    JsonParse,
    Protocol,
    // Resource
    NoMem,
    Busy,
    Cancelled,
    // Logic
    InvalidArg,
    InvalidState,
    InvalidOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PapyrixError {
    pub kind: ErrorKind,
    pub detail: &'static str,
}

impl PapyrixError {
    pub const fn new(kind: ErrorKind, detail: &'static str) -> Self {
        Self { kind, detail }
    }
}

impl core::fmt::Display for PapyrixError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

pub type Result<T> = core::result::Result<T, PapyrixError>;

/// Map the storage facade's string errors onto a coarse kind. The string
/// literals below are the exact messages `drivers::storage` returns.
pub fn from_storage_str(msg: &'static str) -> PapyrixError {
    let kind = if msg.contains("not found") || msg.contains("no such") {
        ErrorKind::NotFound
    } else if msg.contains("invalid") {
        ErrorKind::InvalidArg
    } else {
        ErrorKind::IOError
    };
    PapyrixError::new(kind, msg)
}
