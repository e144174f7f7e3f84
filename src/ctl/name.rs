//! Dotted control names
//!
//! Names are ASCII, case-sensitive, and dot-separated; indexed entities get
//! their number interpolated as a segment (`stats.arenas.2.bins.5.nruns`).

use crate::error::{CtlError, Result};
use core::fmt;
use std::ffi::{CStr, CString};

/// A NUL-terminated property name, valid for the duration of a control call
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CtlName {
    raw: CString,
}

impl CtlName {
    pub fn new(name: &str) -> Result<Self> {
        CString::new(name)
            .map(|raw| Self { raw })
            .map_err(|_| CtlError::InvalidName {
                name: name.to_owned(),
            })
    }

    #[inline]
    pub fn as_c_str(&self) -> &CStr {
        &self.raw
    }

    pub fn as_str(&self) -> &str {
        // Built from a &str, so always valid UTF-8.
        self.raw.to_str().unwrap_or_default()
    }
}

impl fmt::Display for CtlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for CtlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CtlName({:?})", self.as_str())
    }
}

impl TryFrom<&str> for CtlName {
    type Error = CtlError;

    fn try_from(name: &str) -> Result<Self> {
        Self::new(name)
    }
}

/// `config.<param>`
pub fn config(param: &str) -> Result<CtlName> {
    CtlName::new(&format!("config.{}", param))
}

/// `opt.<param>`
pub fn opt(param: &str) -> Result<CtlName> {
    CtlName::new(&format!("opt.{}", param))
}

/// `arenas.<param>`
pub fn arenas(param: &str) -> Result<CtlName> {
    CtlName::new(&format!("arenas.{}", param))
}

/// `arenas.bin.<j>.<field>`
pub fn bin(j: u32, field: &str) -> Result<CtlName> {
    CtlName::new(&format!("arenas.bin.{}.{}", j, field))
}

/// `arenas.lrun.<j>.size`
pub fn lrun(j: u32) -> Result<CtlName> {
    CtlName::new(&format!("arenas.lrun.{}.size", j))
}

/// `arenas.hchunk.<j>.size`
pub fn hchunk(j: u32) -> Result<CtlName> {
    CtlName::new(&format!("arenas.hchunk.{}.size", j))
}

/// `stats.<param>`
pub fn stats(param: &str) -> Result<CtlName> {
    CtlName::new(&format!("stats.{}", param))
}

/// Prefix shared by every statistic of arena `i`
pub fn arena_prefix(i: u32) -> String {
    format!("stats.arenas.{}.", i)
}

/// `stats.arenas.<i>.<param>`
pub fn arena_stat(i: u32, param: &str) -> Result<CtlName> {
    CtlName::new(&format!("{}{}", arena_prefix(i), param))
}

/// `stats.arenas.<i>.bins.<j>.<field>`
pub fn arena_bin_stat(i: u32, j: u32, field: &str) -> Result<CtlName> {
    CtlName::new(&format!("{}bins.{}.{}", arena_prefix(i), j, field))
}

/// `stats.arenas.<i>.lruns.<j>.<field>`
pub fn arena_lrun_stat(i: u32, j: u32, field: &str) -> Result<CtlName> {
    CtlName::new(&format!("{}lruns.{}.{}", arena_prefix(i), j, field))
}

/// `stats.arenas.<i>.hchunks.<j>.<field>`
pub fn arena_hchunk_stat(i: u32, j: u32, field: &str) -> Result<CtlName> {
    CtlName::new(&format!("{}hchunks.{}.{}", arena_prefix(i), j, field))
}
