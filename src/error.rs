//! Error types for devkv.
//!
//! Every operation against the device reports one of the outcomes below.
//! Validation failures are detected before any control-channel call; device
//! failures are translated from the errno the channel reports.

use nix::errno::Errno;
use thiserror::Error;

/// Result type alias for devkv operations.
///
/// This is a convenience alias for `Result<T, StorageError>`.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error types for client operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Bad caller input, a closed or released resource, or a malformed request.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing key or entry, or no completion events ready.
    ///
    /// Not necessarily a failure: `poll_completion` reports an idle wait
    /// with this variant.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The device rejected a control call for a reason not otherwise classified.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Host-side I/O error (opening the device node, reading the event signal).
    #[error("Host I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid batch encoding, integrity mismatch or oversized key.
    #[error("Corruption: {0}")]
    Corruption(String),

    /// The requested operation is not supported in this mode.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Reported by manual compaction when the column family has no
    /// compaction filter factory. The variant name is kept for compatibility
    /// with existing callers matching on it.
    #[error("No space: {0}")]
    NoSpace(String),

    /// Configuration validation failed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON parsing or serialization of a configuration file failed.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl StorageError {
    /// Translate a failed keyed control call: "no such entry" becomes
    /// `NotFound`, everything else `IoError`.
    pub(crate) fn from_keyed_call(errno: Errno, key: &[u8]) -> Self {
        let key = String::from_utf8_lossy(key).into_owned();
        if errno == Errno::ENXIO {
            StorageError::NotFound(key)
        } else {
            StorageError::IoError(format!("{}: {}", key, errno.desc()))
        }
    }

    /// Device failure for an unkeyed control call.
    pub(crate) fn device(what: &str, errno: Errno) -> Self {
        StorageError::IoError(format!("{} failed: {}", what, errno.desc()))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, StorageError::InvalidArgument(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, StorageError::Corruption(_))
    }

    pub fn is_io_error(&self) -> bool {
        matches!(self, StorageError::IoError(_) | StorageError::Io(_))
    }
}
