//! Domain queries - named, typed views of allocator state
//!
//! Design: every query is composed from the typed accessors and either fully
//! succeeds or fails with the name of the property that broke it.
//!
//! Architecture:
//! - `config.rs` - build configuration and runtime options
//! - `sizes.rs` - size-class table (cached for the life of the handle)
//! - `stats.rs` - global, per-arena, per-bin statistics

mod config;
mod sizes;
mod stats;

#[cfg(test)]
mod tests;

pub use config::{OptionSpec, BUILD_FLAGS, OPTIONS};
pub use sizes::{BinClass, SizeClassTable};
pub use stats::{ArenaStats, BinStats, ChunkStats, ClassTotals, GlobalStats, RunStats};

use crate::ctl::{self, name, Mallctl, WriteCb};
use crate::error::{CtlError, Result};
use crate::logging::debug;
use core::ffi::{c_char, c_void};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};
use once_cell::sync::OnceCell;
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};

/// Whether a `version` string is from a release whose control names this
/// crate reads (4.1 through 4.5)
pub fn is_supported_version(version: &str) -> bool {
    let mut parts = version.split(|c: char| c == '.' || c == '-');
    let major = parts.next().and_then(|p| p.parse::<u32>().ok());
    let minor = parts.next().and_then(|p| p.parse::<u32>().ok());
    matches!((major, minor), (Some(4), Some(1..=5)))
}

/// Typed view over one allocator's control interface
///
/// Holds two write-once caches: the size-class table, and the address of the
/// live `stats.cactive` counter.
pub struct Introspector<B> {
    backend: B,
    sizes: OnceCell<SizeClassTable>,
    cactive: OnceCell<LiveCounter>,
}

/// Address of a counter the allocator updates atomically in place
#[derive(Debug, Clone, Copy)]
struct LiveCounter(NonNull<AtomicUsize>);

// The pointee is owned by the allocator for the life of the process.
unsafe impl Send for LiveCounter {}
unsafe impl Sync for LiveCounter {}

impl LiveCounter {
    fn load(self) -> usize {
        unsafe { self.0.as_ref() }.load(Ordering::Relaxed)
    }
}

impl<B: Mallctl> Introspector<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            sizes: OnceCell::new(),
            cactive: OnceCell::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// `version`, e.g. `"4.5.0-0-g04380e79f1e2428bd0ad000bbc6e3d2dfc6b66a5"`
    pub fn version(&self) -> Result<Option<String>> {
        ctl::get_string(&self.backend, &ctl::CtlName::new("version")?)
    }

    /// `arenas.narenas`: number of arena slots, initialized or not
    pub fn arena_count(&self) -> Result<u32> {
        ctl::get_u32(&self.backend, &name::arenas("narenas")?)
    }

    /// Indices of initialized arenas, each below [`arena_count`](Self::arena_count)
    ///
    /// Never cached: arenas come and go. The bitmap is fetched in one call.
    pub fn initialized_arenas(&self) -> Result<BTreeSet<u32>> {
        let count = self.arena_count()?;
        let bits = ctl::get_bool_array(&self.backend, &name::arenas("initialized")?, count as usize)?;
        Ok(bits
            .into_iter()
            .enumerate()
            .filter(|(_, init)| *init)
            .map(|(i, _)| i as u32)
            .collect())
    }

    /// Dump the allocator's own report to its default destination
    ///
    /// Fire-and-forget: formatting problems inside the allocator are not
    /// reported back.
    pub fn stats_print(&self) {
        debug!("malloc_stats_print to default destination");
        unsafe {
            self.backend
                .malloc_stats_print(None, ptr::null_mut(), ptr::null());
        }
    }

    /// Capture the allocator's report as a string
    ///
    /// `opts` is passed through verbatim (jemalloc letters such as `"gbl"`).
    pub fn stats_report(&self, opts: Option<&str>) -> Result<String> {
        unsafe extern "C" fn append(opaque: *mut c_void, msg: *const c_char) {
            if opaque.is_null() || msg.is_null() {
                return;
            }
            let out = &mut *(opaque as *mut Vec<u8>);
            out.extend_from_slice(CStr::from_ptr(msg).to_bytes());
        }

        let opts = opts
            .map(|o| {
                CString::new(o).map_err(|_| CtlError::InvalidName { name: o.to_owned() })
            })
            .transpose()?;
        let mut out: Vec<u8> = Vec::new();

        unsafe {
            self.backend.malloc_stats_print(
                Some(append as WriteCb),
                &mut out as *mut Vec<u8> as *mut c_void,
                opts.as_ref().map_or(ptr::null(), |o| o.as_ptr()),
            );
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}
