//! Value kinds carried by control properties
//!
//! Every property has exactly one kind, fixed by the caller's name table and
//! never inferred from the allocator.

use crate::width::WordWidth;
use core::fmt;

/// C type of a control property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CtlType {
    /// `bool`
    Bool,
    /// `size_t`
    Size,
    /// `ssize_t`
    SSize,
    /// `unsigned` / `uint32_t`
    U32,
    /// `uint64_t`
    U64,
    /// `const char *`
    Str,
}

impl CtlType {
    /// Size of the output buffer in bytes
    #[inline]
    pub const fn size(self, width: WordWidth) -> usize {
        match self {
            Self::Bool => 1,
            Self::U32 => 4,
            Self::U64 => 8,
            Self::Size | Self::SSize | Self::Str => width.bytes(),
        }
    }

    /// Check if the size depends on the word width
    #[inline]
    pub const fn is_word(self) -> bool {
        matches!(self, Self::Size | Self::SSize | Self::Str)
    }

    /// C spelling, for diagnostics
    pub const fn c_name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Size => "size_t",
            Self::SSize => "ssize_t",
            Self::U32 => "unsigned",
            Self::U64 => "uint64_t",
            Self::Str => "const char *",
        }
    }
}

/// A decoded property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtlValue {
    Bool(bool),
    Size(usize),
    SSize(isize),
    U32(u32),
    U64(u64),
    /// `None` when the allocator returned a null pointer
    Str(Option<String>),
}

impl CtlValue {
    pub const fn kind(&self) -> CtlType {
        match self {
            Self::Bool(_) => CtlType::Bool,
            Self::Size(_) => CtlType::Size,
            Self::SSize(_) => CtlType::SSize,
            Self::U32(_) => CtlType::U32,
            Self::U64(_) => CtlType::U64,
            Self::Str(_) => CtlType::Str,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Unsigned view of any non-negative integer value
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::Size(v) => Some(v as u64),
            Self::U32(v) => Some(v as u64),
            Self::U64(v) => Some(v),
            Self::SSize(v) if v >= 0 => Some(v as u64),
            _ => None,
        }
    }

    /// Signed view of any integer value that fits
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::SSize(v) => Some(v as i64),
            Self::U32(v) => Some(v as i64),
            Self::Size(v) => i64::try_from(v).ok(),
            Self::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => s.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for CtlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Size(v) => write!(f, "{}", v),
            Self::SSize(v) => write!(f, "{}", v),
            Self::U32(v) => write!(f, "{}", v),
            Self::U64(v) => write!(f, "{}", v),
            Self::Str(Some(s)) => write!(f, "\"{}\"", s),
            Self::Str(None) => write!(f, "(null)"),
        }
    }
}
