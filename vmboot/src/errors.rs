//! Error types shared by the initramfs encoder and the kernel loader.

use std::io;

use thiserror::Error;

/// Errors produced while preparing direct-boot artifacts.
///
/// Every variant is fatal for the boot attempt: nothing here is retried and
/// no partial artifact is ever returned alongside an error.
#[derive(Debug, Error)]
pub enum BootError {
    /// Caller-supplied input cannot be encoded (empty name, oversized field).
    #[error("validation error: {0}")]
    Validation(String),

    /// An encoder invariant was broken. Should not happen for valid input.
    #[error("internal error: {0}")]
    Internal(String),

    /// Declared kernel size is zero or cannot be addressed.
    #[error("invalid kernel size: {0}")]
    InvalidSize(String),

    /// I/O failure other than a clean end-of-stream.
    #[error("{context}: {source}")]
    Read {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// A gzip-detected payload could not be decompressed.
    #[error("{context}: {source}")]
    Decompress {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// Kernel image header is missing or malformed.
    #[error("invalid kernel image: {0}")]
    InvalidImage(String),

    /// A newc byte stream could not be decoded.
    #[error("invalid cpio archive: {0}")]
    Archive(String),

    /// Manifest or other configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BootResult<T> = Result<T, BootError>;

impl BootError {
    pub(crate) fn read(context: &'static str, source: io::Error) -> Self {
        Self::Read { context, source }
    }

    pub(crate) fn decompress(context: &'static str, source: io::Error) -> Self {
        Self::Decompress { context, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_carries_stage_label() {
        let err = BootError::read(
            "read kernel",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "read kernel: denied");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_io_error_converts() {
        fn fails() -> BootResult<()> {
            Err(io::Error::new(io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(BootError::Io(_))));
    }
}
