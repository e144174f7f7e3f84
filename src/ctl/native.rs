//! `mallctl` bound to a live jemalloc
//!
//! The entry points are looked up at runtime: first in the running image
//! (jemalloc linked in or preloaded), then in the candidate libraries.

use super::backend::{Mallctl, WriteCb};
use super::library::Library;
use crate::error::{CtlError, Result};
use crate::logging::{log_library_resolved, warn};
use core::ffi::{c_char, c_int, c_void};
use std::ffi::CStr;

type MallctlFn =
    unsafe extern "C" fn(*const c_char, *mut c_void, *mut usize, *mut c_void, usize) -> c_int;
type StatsPrintFn = unsafe extern "C" fn(Option<WriteCb>, *mut c_void, *const c_char);

const ENV_LIBRARY: &str = "JEMALLOC_INTROSPECT_LIBRARY";

/// Where to look for the control entry points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeConfig {
    /// Search the running image before any library
    pub search_process: bool,
    /// Library names or paths, tried in order
    pub library_candidates: Vec<String>,
    /// Symbol prefixes, tried in order (`je_` builds export `je_mallctl`)
    pub symbol_prefixes: Vec<String>,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            search_process: true,
            library_candidates: vec![
                "libjemalloc.so.2".into(),
                "libjemalloc.so".into(),
                "libjemalloc.2.dylib".into(),
                "libjemalloc.dylib".into(),
            ],
            symbol_prefixes: vec![String::new(), "je_".into()],
        }
    }
}

impl NativeConfig {
    /// Default search, with `JEMALLOC_INTROSPECT_LIBRARY` tried first
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var(ENV_LIBRARY) {
            if !path.is_empty() {
                config.library_candidates.insert(0, path);
            }
        }
        config
    }
}

/// The control primitive of a resolved jemalloc
pub struct Native {
    mallctl: MallctlFn,
    stats_print: Option<StatsPrintFn>,
    // Keeps the symbols above mapped.
    library: Library,
}

impl Native {
    /// Resolve with [`NativeConfig::from_env`]
    pub fn resolve() -> Result<Self> {
        Self::with_config(&NativeConfig::from_env())
    }

    pub fn with_config(config: &NativeConfig) -> Result<Self> {
        let mut tried = Vec::new();

        if config.search_process {
            match Library::this_process() {
                Ok(lib) => match Self::bind(lib, &config.symbol_prefixes) {
                    Ok(native) => return Ok(native),
                    Err(reason) => tried.push(reason),
                },
                Err(err) => tried.push(err.to_string()),
            }
        }

        for candidate in &config.library_candidates {
            match Library::open(candidate) {
                Ok(lib) => match Self::bind(lib, &config.symbol_prefixes) {
                    Ok(native) => return Ok(native),
                    Err(reason) => tried.push(reason),
                },
                Err(err) => tried.push(err.to_string()),
            }
        }

        Err(CtlError::LibraryUnavailable {
            reason: tried.join("; "),
        })
    }

    fn bind(library: Library, prefixes: &[String]) -> core::result::Result<Self, String> {
        for prefix in prefixes {
            let Some(mallctl) = library.symbol(&format!("{}mallctl", prefix)) else {
                continue;
            };
            let stats_print = library.symbol(&format!("{}malloc_stats_print", prefix));

            // Both symbols come from jemalloc's exported C API.
            let (mallctl, stats_print) = unsafe {
                (
                    core::mem::transmute::<*mut c_void, MallctlFn>(mallctl.as_ptr()),
                    stats_print
                        .map(|p| core::mem::transmute::<*mut c_void, StatsPrintFn>(p.as_ptr())),
                )
            };

            log_library_resolved(library.label(), stats_print.is_some());
            return Ok(Self {
                mallctl,
                stats_print,
                library,
            });
        }
        Err(format!("{}: no mallctl symbol", library.label()))
    }

    /// Library the entry points were found in
    pub fn source(&self) -> &str {
        self.library.label()
    }
}

impl Mallctl for Native {
    unsafe fn mallctl(
        &self,
        name: &CStr,
        oldp: *mut c_void,
        oldlenp: *mut usize,
        newp: *mut c_void,
        newlen: usize,
    ) -> c_int {
        (self.mallctl)(name.as_ptr(), oldp, oldlenp, newp, newlen)
    }

    unsafe fn malloc_stats_print(
        &self,
        write_cb: Option<WriteCb>,
        opaque: *mut c_void,
        opts: *const c_char,
    ) {
        match self.stats_print {
            Some(print) => print(write_cb, opaque, opts),
            None => warn!(
                source = self.source(),
                "malloc_stats_print not exported, skipping report"
            ),
        }
    }
}
