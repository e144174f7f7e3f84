//! Error taxonomy for control-path failures
//!
//! A null string or pointer is not an error: accessors return `Ok(None)` for
//! it. Everything here aborts the enclosing query.

use core::fmt;

/// Errors raised while talking to the allocator's control interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtlError {
    /// `size_t` is neither 4 nor 8 bytes wide
    UnsupportedPlatform { word_bytes: usize },
    /// The control call returned a nonzero status for `name`
    ControlCallFailed { name: String, status: i32 },
    /// The call succeeded but wrote a different number of bytes than requested
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    /// Name contains an interior NUL byte
    InvalidName { name: String },
    /// Arena index is out of range or the arena was never initialized
    NotInitialized { index: u32 },
    /// The native entry point could not be resolved
    LibraryUnavailable { reason: String },
}

impl CtlError {
    /// Property name the error refers to, if any
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::ControlCallFailed { name, .. }
            | Self::LengthMismatch { name, .. }
            | Self::InvalidName { name } => Some(name),
            _ => None,
        }
    }

    pub(crate) fn call_failed(name: &str, status: i32) -> Self {
        Self::ControlCallFailed {
            name: name.to_owned(),
            status,
        }
    }
}

impl fmt::Display for CtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedPlatform { word_bytes } => {
                write!(f, "Unsupported architecture: size_t size = {}", word_bytes)
            }
            Self::ControlCallFailed { name, status } => {
                write!(f, "mallctl(\"{}\") failed with status {}", name, status)
            }
            Self::LengthMismatch {
                name,
                expected,
                actual,
            } => write!(
                f,
                "mallctl(\"{}\") returned {} bytes, expected {}",
                name, actual, expected
            ),
            Self::InvalidName { name } => {
                write!(f, "Invalid control name: {:?}", name)
            }
            Self::NotInitialized { index } => {
                write!(f, "Arena {} is not initialized", index)
            }
            Self::LibraryUnavailable { reason } => {
                write!(f, "jemalloc control interface unavailable: {}", reason)
            }
        }
    }
}

impl std::error::Error for CtlError {}

/// Result alias used across the crate
pub type Result<T> = core::result::Result<T, CtlError>;
