//! Size-class table
//!
//! These are compiled-in constants of the allocator build, so the table is
//! queried once per [`Introspector`] and then handed out by reference.

use super::Introspector;
use crate::ctl::{self, name, Mallctl};
use crate::error::Result;
use crate::logging::log_cache_fill;

/// One small size class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinClass {
    /// Region size in bytes
    pub size: usize,
    /// Regions per run
    pub nregs: u32,
    /// Bytes per run
    pub run_size: usize,
}

/// Size classes and paging constants of the running allocator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeClassTable {
    /// `arenas.quantum`
    pub quantum: usize,
    /// `arenas.page`
    pub page: usize,
    /// `arenas.tcache_max`; `None` on builds without thread caches
    pub tcache_max: Option<usize>,
    /// `arenas.nhbins`; `None` on builds without thread caches
    pub nhbins: Option<u32>,
    /// Small classes, ascending
    pub bins: Vec<BinClass>,
    /// Large run classes (`arenas.lrun.<i>.size`), ascending
    pub large: Vec<usize>,
    /// Huge chunk classes (`arenas.hchunk.<i>.size`), ascending
    pub huge: Vec<usize>,
}

impl SizeClassTable {
    fn load<B: Mallctl + ?Sized>(backend: &B) -> Result<Self> {
        let tcache = ctl::get_bool(backend, &name::config("tcache")?)?;
        let (tcache_max, nhbins) = if tcache {
            (
                Some(ctl::get_size(backend, &name::arenas("tcache_max")?)?),
                Some(ctl::get_u32(backend, &name::arenas("nhbins")?)?),
            )
        } else {
            (None, None)
        };

        let nbins = ctl::get_u32(backend, &name::arenas("nbins")?)?;
        let bins = (0..nbins)
            .map(|j| {
                Ok(BinClass {
                    size: ctl::get_size(backend, &name::bin(j, "size")?)?,
                    nregs: ctl::get_u32(backend, &name::bin(j, "nregs")?)?,
                    run_size: ctl::get_size(backend, &name::bin(j, "run_size")?)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let nlruns = ctl::get_u32(backend, &name::arenas("nlruns")?)?;
        let large = (0..nlruns)
            .map(|j| ctl::get_size(backend, &name::lrun(j)?))
            .collect::<Result<Vec<_>>>()?;

        let nhchunks = ctl::get_u32(backend, &name::arenas("nhchunks")?)?;
        let huge = (0..nhchunks)
            .map(|j| ctl::get_size(backend, &name::hchunk(j)?))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            quantum: ctl::get_size(backend, &name::arenas("quantum")?)?,
            page: ctl::get_size(backend, &name::arenas("page")?)?,
            tcache_max,
            nhbins,
            bins,
            large,
            huge,
        })
    }

    /// Whether the build has thread caches
    #[inline]
    pub fn has_tcache(&self) -> bool {
        self.tcache_max.is_some()
    }

    /// Largest small allocation
    pub fn small_max(&self) -> Option<usize> {
        self.bins.last().map(|b| b.size)
    }

    /// Largest large (run-backed) allocation
    pub fn large_max(&self) -> Option<usize> {
        self.large.last().copied()
    }

    /// Small class a request of `size` bytes is rounded up to
    pub fn bin_for(&self, size: usize) -> Option<&BinClass> {
        let idx = self.bins.partition_point(|b| b.size < size);
        self.bins.get(idx)
    }
}

impl<B: Mallctl> Introspector<B> {
    /// The size-class table, queried on first use
    ///
    /// Every call returns the same instance.
    pub fn sizes(&self) -> Result<&SizeClassTable> {
        self.sizes.get_or_try_init(|| {
            let _span = crate::query_span!("sizes");
            let table = SizeClassTable::load(&self.backend)?;
            log_cache_fill(
                "sizes",
                table.bins.len() + table.large.len() + table.huge.len(),
            );
            Ok(table)
        })
    }
}
