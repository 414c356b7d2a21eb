// error.rs — Probe error taxonomy.
//
// Mirrors the two-tier error style already present in this codebase: plain
// Debug-only enums for low-level codec failures, and a richer enum with a
// hand-written Display/Error impl for the type callers actually propagate.
// `ProbeError` is the latter, covering the five outcomes a `Device` or the
// prober itself can produce.

use std::fmt;
use std::io;

/// Error taxonomy for device operations and the probing algorithm.
///
/// Equivalent in spirit to the error codes `libdevs.c`/`libprobe.c` report via
/// `errno` and `assert()`: a bad argument aborts the call, an I/O failure is
/// retried once by the caller before being treated as fatal, a vanished
/// device is unrecoverable, and construction-time failures
/// (`Unsupported`, `OutOfMemory`) never occur mid-probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// A caller-supplied argument is out of range or self-contradictory
    /// (e.g. `max_blocks == 0`, a block order below the device's sector size).
    InvalidArgument(String),
    /// An I/O operation failed. The caller may retry once; a second failure
    /// at the same offset should be treated as `DeviceGone`.
    Io(String),
    /// The device no longer responds (unplugged, reset failed to bring it
    /// back, or filename republishing after a reset did not resolve).
    DeviceGone,
    /// The requested capability is not available on this platform or for
    /// this device (e.g. `O_DIRECT` on a non-Unix target). Surfaces only at
    /// construction time.
    Unsupported(String),
    /// A wrapper could not allocate the memory it needs (cache buffer, safe
    /// device's recovery arena). Surfaces only at construction time.
    OutOfMemory,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            ProbeError::Io(msg) => write!(f, "i/o error: {msg}"),
            ProbeError::DeviceGone => write!(f, "device is gone"),
            ProbeError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            ProbeError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for ProbeError {}

impl From<io::Error> for ProbeError {
    fn from(e: io::Error) -> Self {
        ProbeError::Io(e.to_string())
    }
}

/// Convenience alias used throughout the device and probe modules.
pub type ProbeResultT<T> = Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_human_readable() {
        assert_eq!(
            ProbeError::InvalidArgument("max_blocks is 0".into()).to_string(),
            "invalid argument: max_blocks is 0"
        );
        assert_eq!(ProbeError::DeviceGone.to_string(), "device is gone");
        assert_eq!(ProbeError::OutOfMemory.to_string(), "out of memory");
    }

    #[test]
    fn io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "nope");
        let pe: ProbeError = io_err.into();
        assert!(matches!(pe, ProbeError::Io(_)));
    }
}
