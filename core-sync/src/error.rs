//! # Sync Error Types
//!
//! Two tiers of failure:
//! - [`SyncError`]: aborts the whole sync call (preconditions, index)
//! - [`FileError`]: affects a single file; the sync reports it and moves on

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Device not found at {}. Is it mounted?", path.display())]
    DeviceNotFound { path: PathBuf },

    #[error("Device path {} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    #[error("Device at {} is read-only or write-protected: {reason}", path.display())]
    DeviceReadOnly { path: PathBuf, reason: String },

    #[error("Output directory {} is unavailable: {reason}", path.display())]
    OutputDirUnavailable { path: PathBuf, reason: String },

    #[error("Invalid library layout: {0}")]
    InvalidLayout(String),

    #[error("Staging area unavailable: {0}")]
    Staging(String),

    #[error("Failed to write index: {0}")]
    IndexWrite(String),

    #[error("Index verification failed: {0}")]
    IndexVerification(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },
}

impl SyncError {
    /// Returns `true` if the error was raised before anything on the
    /// device was modified.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SyncError::DeviceNotFound { .. }
                | SyncError::NotADirectory { .. }
                | SyncError::DeviceReadOnly { .. }
                | SyncError::OutputDirUnavailable { .. }
                | SyncError::InvalidLayout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Recoverable, per-file failure.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("Source file is not readable: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Conversion failed: {0}")]
    Decode(String),

    #[error("Staging failed: {0}")]
    Staging(String),

    #[error("Not enough space on device to write {}", path.display())]
    OutOfSpace { path: PathBuf },

    #[error("Device is read-only, cannot write {}", path.display())]
    ReadOnly { path: PathBuf },

    #[error("Failed to write {}: {reason}", path.display())]
    DestinationIo { path: PathBuf, reason: String },

    #[error("Converted payload of {size} bytes exceeds the 4 GiB artifact limit")]
    PayloadTooLarge { size: u64 },
}

impl FileError {
    /// Classify a destination write failure by cause.
    pub fn from_destination_io(path: PathBuf, err: &io::Error) -> Self {
        if is_out_of_space(err) {
            FileError::OutOfSpace { path }
        } else if is_read_only(err) {
            FileError::ReadOnly { path }
        } else {
            FileError::DestinationIo {
                path,
                reason: err.to_string(),
            }
        }
    }
}

/// ENOSPC / EDQUOT and their Windows equivalents.
pub fn is_out_of_space(err: &io::Error) -> bool {
    match err.raw_os_error() {
        #[cfg(target_os = "linux")]
        Some(28) | Some(122) => true,
        #[cfg(all(unix, not(target_os = "linux")))]
        Some(28) | Some(69) => true,
        // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
        #[cfg(windows)]
        Some(39) | Some(112) => true,
        _ => false,
    }
}

/// EROFS / EACCES-style failures and their Windows equivalents.
pub fn is_read_only(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }

    match err.raw_os_error() {
        #[cfg(unix)]
        Some(30) => true,
        // ERROR_WRITE_PROTECT
        #[cfg(windows)]
        Some(19) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        let err = SyncError::DeviceNotFound {
            path: PathBuf::from("/media/none"),
        };
        assert!(err.is_precondition());
        assert!(!SyncError::IndexWrite("disk".into()).is_precondition());
    }

    #[test]
    fn test_permission_denied_is_read_only() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        let file_err = FileError::from_destination_io(PathBuf::from("Pop/a.pcm"), &err);
        assert!(matches!(file_err, FileError::ReadOnly { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_os_error_classification() {
        let enospc = io::Error::from_raw_os_error(28);
        assert!(matches!(
            FileError::from_destination_io(PathBuf::from("a.pcm"), &enospc),
            FileError::OutOfSpace { .. }
        ));

        let erofs = io::Error::from_raw_os_error(30);
        assert!(matches!(
            FileError::from_destination_io(PathBuf::from("a.pcm"), &erofs),
            FileError::ReadOnly { .. }
        ));

        let eio = io::Error::from_raw_os_error(5);
        assert!(matches!(
            FileError::from_destination_io(PathBuf::from("a.pcm"), &eio),
            FileError::DestinationIo { .. }
        ));
    }

    #[test]
    fn test_messages_are_actionable() {
        let err = FileError::OutOfSpace {
            path: PathBuf::from("Pop/song1.pcm"),
        };
        assert_eq!(err.to_string(), "Not enough space on device to write Pop/song1.pcm");
    }
}
