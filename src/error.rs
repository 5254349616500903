//! Error types for loopshare.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using loopshare's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in loopshare operations.
#[derive(Error, Debug)]
pub enum Error {
    // Disk image errors
    /// Generic disk image error.
    #[error("disk error: {0}")]
    Disk(String),

    /// Disk image already exists.
    ///
    /// Surfaced as its own variant so provisioning can treat it as
    /// "already provisioned" and move on.
    #[error("disk image already exists: {}", path.display())]
    DiskExists {
        /// Path to the existing image.
        path: PathBuf,
    },

    /// Disk image not found.
    #[error("disk image not found: {}", path.display())]
    DiskNotFound {
        /// Path that was not found.
        path: PathBuf,
    },

    /// Filesystem cannot be grown.
    #[error("unsupported filesystem for resize: {0}")]
    UnsupportedFilesystem(String),

    // Loop device errors
    /// Loop device acquire/release failure.
    #[error("loop device error: {0}")]
    Loop(String),

    // Command execution errors
    /// External command failed.
    #[error("command failed: {command}: {message}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// Error message.
        message: String,
    },

    // Service status errors
    /// The status tool returned output the monitor could not parse.
    #[error("status error: {0}")]
    Status(String),

    // Configuration errors
    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed size string.
    #[error("invalid size '{input}': {reason}")]
    InvalidSize {
        /// The string that failed to parse.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    // IO errors
    /// IO error wrapper.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a disk error with a message.
    pub fn disk(msg: impl Into<String>) -> Self {
        Self::Disk(msg.into())
    }

    /// Create a loop device error with a message.
    pub fn loop_device(msg: impl Into<String>) -> Self {
        Self::Loop(msg.into())
    }

    /// Create a command failed error.
    pub fn command_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid size error.
    pub fn invalid_size(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSize {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Error messages should include context that helps users fix the problem.

    #[test]
    fn test_disk_exists_includes_path() {
        let err = Error::DiskExists {
            path: PathBuf::from("/srv/disks/private.img"),
        };
        let msg = err.to_string();
        assert!(
            msg.contains("/srv/disks/private.img"),
            "Error should include the image path"
        );
    }

    #[test]
    fn test_disk_not_found_includes_path() {
        let err = Error::DiskNotFound {
            path: PathBuf::from("/nonexistent/disk.img"),
        };
        let msg = err.to_string();
        assert!(
            msg.contains("/nonexistent/disk.img"),
            "Error should include the path"
        );
    }

    #[test]
    fn test_command_failed_includes_command_and_message() {
        let err = Error::command_failed("losetup --find --show", "no free loop devices");
        let msg = err.to_string();
        assert!(msg.contains("losetup"), "Error should include command name");
        assert!(
            msg.contains("no free loop devices"),
            "Error should include error message"
        );
    }

    #[test]
    fn test_unsupported_filesystem_includes_type() {
        let err = Error::UnsupportedFilesystem("xfs".to_string());
        let msg = err.to_string();
        assert!(msg.contains("xfs"), "Error should name the filesystem");
    }

    #[test]
    fn test_invalid_size_includes_input_and_reason() {
        let err = Error::invalid_size("5XB", "unsupported unit: XB");
        let msg = err.to_string();
        assert!(msg.contains("5XB"), "Error should include the input");
        assert!(msg.contains("XB"), "Error should explain what's wrong");
    }
}
