//! Build configuration (`config.*`) and runtime options (`opt.*`)

use super::Introspector;
use crate::ctl::{self, name, CtlType, CtlValue, Mallctl};
use crate::error::Result;
use crate::logging::log_capability_absent;
use std::collections::BTreeMap;

/// Boolean `config.*` flags of a jemalloc 4.x build
pub const BUILD_FLAGS: &[&str] = &[
    "cache_oblivious",
    "debug",
    "fill",
    "lazy_lock",
    "munmap",
    "prof",
    "prof_libgcc",
    "prof_libunwind",
    "stats",
    "tcache",
    "tls",
    "utrace",
    "valgrind",
    "xmalloc",
];

/// An `opt.*` property and the build flag it depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: CtlType,
    /// `config.<flag>` that must be true for the option to exist
    pub requires: Option<&'static str>,
}

const fn always(name: &'static str, kind: CtlType) -> OptionSpec {
    OptionSpec {
        name,
        kind,
        requires: None,
    }
}

const fn with(flag: &'static str, name: &'static str, kind: CtlType) -> OptionSpec {
    OptionSpec {
        name,
        kind,
        requires: Some(flag),
    }
}

/// Runtime options of jemalloc 4.x
pub const OPTIONS: &[OptionSpec] = &[
    always("abort", CtlType::Bool),
    always("dss", CtlType::Str),
    always("lg_chunk", CtlType::Size),
    always("narenas", CtlType::U32),
    always("purge", CtlType::Str),
    always("lg_dirty_mult", CtlType::SSize),
    always("decay_time", CtlType::SSize),
    always("stats_print", CtlType::Bool),
    with("fill", "junk", CtlType::Str),
    with("fill", "quarantine", CtlType::Size),
    with("fill", "redzone", CtlType::Bool),
    with("fill", "zero", CtlType::Bool),
    with("utrace", "utrace", CtlType::Bool),
    with("xmalloc", "xmalloc", CtlType::Bool),
    with("tcache", "tcache", CtlType::Bool),
    with("tcache", "lg_tcache_max", CtlType::SSize),
    with("prof", "prof", CtlType::Bool),
    with("prof", "prof_prefix", CtlType::Str),
    with("prof", "prof_active", CtlType::Bool),
    with("prof", "prof_thread_active_init", CtlType::Bool),
    with("prof", "lg_prof_sample", CtlType::Size),
    with("prof", "prof_accum", CtlType::Bool),
    with("prof", "lg_prof_interval", CtlType::SSize),
    with("prof", "prof_gdump", CtlType::Bool),
    with("prof", "prof_final", CtlType::Bool),
    with("prof", "prof_leak", CtlType::Bool),
];

impl<B: Mallctl> Introspector<B> {
    /// Every `config.*` flag, keyed by flag name
    pub fn build_configuration(&self) -> Result<BTreeMap<&'static str, bool>> {
        let _span = crate::query_span!("build_configuration");

        BUILD_FLAGS
            .iter()
            .map(|&flag| Ok((flag, ctl::get_bool(&self.backend, &name::config(flag)?)?)))
            .collect()
    }

    /// `config.malloc_conf`: options compiled into the build
    pub fn compiled_malloc_conf(&self) -> Result<Option<String>> {
        ctl::get_string(&self.backend, &name::config("malloc_conf")?)
    }

    /// Every runtime option this build provides, keyed by option name
    ///
    /// Options whose build flag is off are left out rather than queried,
    /// since jemalloc rejects them.
    pub fn options(&self) -> Result<BTreeMap<&'static str, CtlValue>> {
        let _span = crate::query_span!("options");
        let config = self.build_configuration()?;

        let mut options = BTreeMap::new();
        for spec in OPTIONS {
            if let Some(flag) = spec.requires {
                if !config.get(flag).copied().unwrap_or(false) {
                    log_capability_absent(spec.name, flag);
                    continue;
                }
            }
            let value = ctl::read(&self.backend, &name::opt(spec.name)?, spec.kind)?;
            options.insert(spec.name, value);
        }
        Ok(options)
    }
}
