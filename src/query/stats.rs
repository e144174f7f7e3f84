//! Allocator statistics
//!
//! jemalloc caches its statistics between epochs; [`Introspector::stats`]
//! advances the epoch first so the snapshot is current.

use super::{Introspector, LiveCounter, SizeClassTable};
use crate::ctl::{self, name, CtlName, Mallctl};
use crate::error::{CtlError, Result};
use crate::logging::{log_cache_fill, log_capability_absent};
use std::collections::BTreeMap;

/// Totals for one allocation class (small, large or huge) of an arena
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassTotals {
    pub allocated: usize,
    pub nmalloc: u64,
    pub ndalloc: u64,
    pub nrequests: u64,
}

/// Counters of one small bin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinStats {
    pub nmalloc: u64,
    pub ndalloc: u64,
    pub nrequests: u64,
    /// Regions currently in use
    pub curregs: usize,
    /// Thread-cache fills; `None` without thread caches
    pub nfills: Option<u64>,
    /// Thread-cache flushes; `None` without thread caches
    pub nflushes: Option<u64>,
    pub nruns: u64,
    pub nreruns: u64,
    pub curruns: usize,
}

/// Counters of one large run class or huge chunk class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub nmalloc: u64,
    pub ndalloc: u64,
    pub nrequests: u64,
    /// Runs (or huge chunks) currently live
    pub current: usize,
}

/// Snapshot of one arena
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaStats {
    pub index: u32,
    pub nthreads: u32,
    /// Precedence of `sbrk` relative to `mmap`
    pub dss: Option<String>,
    pub lg_dirty_mult: isize,
    pub decay_time: isize,
    pub pactive: usize,
    pub pdirty: usize,
    pub mapped: usize,
    pub metadata_mapped: usize,
    pub metadata_allocated: usize,
    pub npurge: u64,
    pub nmadvise: u64,
    pub purged: u64,
    pub small: ClassTotals,
    pub large: ClassTotals,
    pub huge: ClassTotals,
    /// Keyed by region size; only bins that ever allocated a run
    pub bins: BTreeMap<usize, BinStats>,
    /// Keyed by run size; only classes with requests
    pub lruns: BTreeMap<usize, RunStats>,
    /// Keyed by chunk size; only classes with requests
    pub hchunks: BTreeMap<usize, RunStats>,
}

/// Chunk counters exposed by 3.x-compatible builds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkStats {
    pub current: usize,
    pub total: u64,
    pub high: usize,
}

/// Allocator-wide snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalStats {
    pub allocated: usize,
    pub active: usize,
    pub metadata: usize,
    pub resident: usize,
    pub mapped: usize,
    /// Live `stats.cactive` value; `None` if the allocator exposes no counter
    pub cactive: Option<usize>,
    pub chunks: Option<ChunkStats>,
    /// One slot per arena index; `None` for uninitialized arenas
    pub arenas: Vec<Option<ArenaStats>>,
}

impl GlobalStats {
    /// Initialized arenas in index order
    pub fn initialized(&self) -> impl Iterator<Item = &ArenaStats> {
        self.arenas.iter().flatten()
    }
}

impl<B: Mallctl> Introspector<B> {
    /// Advance `epoch` so cached statistics are refreshed; returns the new epoch
    pub fn refresh(&self) -> Result<u64> {
        let epoch = CtlName::new("epoch")?;
        ctl::set_u64(&self.backend, &epoch, 1)?;
        ctl::get_u64(&self.backend, &epoch)
    }

    /// Current `stats.cactive`, read through the counter's address
    ///
    /// The address is looked up once; every call after that is a plain load.
    pub fn current_active(&self) -> Result<Option<usize>> {
        if let Some(counter) = self.cactive.get() {
            return Ok(Some(counter.load()));
        }

        let Some(ptr) = ctl::get_size_ptr(&self.backend, &name::stats("cactive")?)? else {
            return Ok(None);
        };
        // First writer wins; a racing thread resolves the same address.
        let counter = *self.cactive.get_or_init(|| {
            log_cache_fill("cactive", 1);
            LiveCounter(ptr.cast())
        });
        Ok(Some(counter.load()))
    }

    /// Allocator-wide statistics plus every initialized arena
    pub fn stats(&self) -> Result<GlobalStats> {
        let _span = crate::query_span!("stats");
        self.refresh()?;

        let size = |param: &str| -> Result<usize> {
            ctl::get_size(&self.backend, &name::stats(param)?)
        };
        let allocated = size("allocated")?;
        let active = size("active")?;
        let metadata = size("metadata")?;
        let resident = size("resident")?;
        let mapped = size("mapped")?;
        let cactive = self.current_active()?;
        let chunks = self.chunk_stats()?;

        let sizes = self.sizes()?;
        let count = self.arena_count()?;
        let initialized = self.initialized_arenas()?;

        let mut arenas = Vec::with_capacity(count as usize);
        for i in 0..count {
            arenas.push(if initialized.contains(&i) {
                Some(self.collect_arena(i, sizes)?)
            } else {
                None
            });
        }

        Ok(GlobalStats {
            allocated,
            active,
            metadata,
            resident,
            mapped,
            cactive,
            chunks,
            arenas,
        })
    }

    /// Statistics of one initialized arena, after advancing the epoch
    pub fn arena_stats(&self, index: u32) -> Result<ArenaStats> {
        let _span = crate::query_span!("arena_stats", index);
        self.refresh()?;
        if !self.initialized_arenas()?.contains(&index) {
            return Err(CtlError::NotInitialized { index });
        }
        let sizes = self.sizes()?;
        self.collect_arena(index, sizes)
    }

    /// Statistics summed over all arenas (jemalloc's pseudo-arena at index
    /// `arena_count`)
    pub fn merged_arena_stats(&self) -> Result<ArenaStats> {
        let _span = crate::query_span!("merged_arena_stats");
        self.refresh()?;
        let index = self.arena_count()?;
        let sizes = self.sizes()?;
        self.collect_arena(index, sizes)
    }

    fn chunk_stats(&self) -> Result<Option<ChunkStats>> {
        let current = name::stats("chunks.current")?;
        match ctl::get_size(&self.backend, &current) {
            Ok(current) => Ok(Some(ChunkStats {
                current,
                total: ctl::get_u64(&self.backend, &name::stats("chunks.total")?)?,
                high: ctl::get_size(&self.backend, &name::stats("chunks.high")?)?,
            })),
            Err(CtlError::ControlCallFailed { .. }) => {
                log_capability_absent(current.as_str(), "not provided by this version");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn collect_arena(&self, i: u32, sizes: &SizeClassTable) -> Result<ArenaStats> {
        let b = &self.backend;
        let size = |param: &str| -> Result<usize> {
            ctl::get_size(b, &name::arena_stat(i, param)?)
        };
        let ssize = |param: &str| -> Result<isize> {
            ctl::get_ssize(b, &name::arena_stat(i, param)?)
        };
        let count = |param: &str| -> Result<u64> {
            ctl::get_u64(b, &name::arena_stat(i, param)?)
        };
        let totals = |class: &str| -> Result<ClassTotals> {
            Ok(ClassTotals {
                allocated: size(&format!("{}.allocated", class))?,
                nmalloc: count(&format!("{}.nmalloc", class))?,
                ndalloc: count(&format!("{}.ndalloc", class))?,
                nrequests: count(&format!("{}.nrequests", class))?,
            })
        };

        let mut bins = BTreeMap::new();
        for (j, class) in sizes.bins.iter().enumerate() {
            let j = j as u32;
            let field = |f: &str| -> Result<u64> {
                ctl::get_u64(b, &name::arena_bin_stat(i, j, f)?)
            };
            let nruns = field("nruns")?;
            if nruns == 0 {
                continue;
            }
            let (nfills, nflushes) = if sizes.has_tcache() {
                (Some(field("nfills")?), Some(field("nflushes")?))
            } else {
                (None, None)
            };
            bins.insert(
                class.size,
                BinStats {
                    nmalloc: field("nmalloc")?,
                    ndalloc: field("ndalloc")?,
                    nrequests: field("nrequests")?,
                    curregs: ctl::get_size(b, &name::arena_bin_stat(i, j, "curregs")?)?,
                    nfills,
                    nflushes,
                    nruns,
                    nreruns: field("nreruns")?,
                    curruns: ctl::get_size(b, &name::arena_bin_stat(i, j, "curruns")?)?,
                },
            );
        }

        let mut lruns = BTreeMap::new();
        for (j, &run_size) in sizes.large.iter().enumerate() {
            let j = j as u32;
            let field = |f: &str| -> Result<u64> {
                ctl::get_u64(b, &name::arena_lrun_stat(i, j, f)?)
            };
            let nrequests = field("nrequests")?;
            if nrequests == 0 {
                continue;
            }
            lruns.insert(
                run_size,
                RunStats {
                    nmalloc: field("nmalloc")?,
                    ndalloc: field("ndalloc")?,
                    nrequests,
                    current: ctl::get_size(b, &name::arena_lrun_stat(i, j, "curruns")?)?,
                },
            );
        }

        let mut hchunks = BTreeMap::new();
        for (j, &chunk_size) in sizes.huge.iter().enumerate() {
            let j = j as u32;
            let field = |f: &str| -> Result<u64> {
                ctl::get_u64(b, &name::arena_hchunk_stat(i, j, f)?)
            };
            let nrequests = field("nrequests")?;
            if nrequests == 0 {
                continue;
            }
            hchunks.insert(
                chunk_size,
                RunStats {
                    nmalloc: field("nmalloc")?,
                    ndalloc: field("ndalloc")?,
                    nrequests,
                    current: ctl::get_size(b, &name::arena_hchunk_stat(i, j, "curhchunks")?)?,
                },
            );
        }

        Ok(ArenaStats {
            index: i,
            nthreads: ctl::get_u32(b, &name::arena_stat(i, "nthreads")?)?,
            dss: ctl::get_string(b, &name::arena_stat(i, "dss")?)?,
            lg_dirty_mult: ssize("lg_dirty_mult")?,
            decay_time: ssize("decay_time")?,
            pactive: size("pactive")?,
            pdirty: size("pdirty")?,
            mapped: size("mapped")?,
            metadata_mapped: size("metadata.mapped")?,
            metadata_allocated: size("metadata.allocated")?,
            npurge: count("npurge")?,
            nmadvise: count("nmadvise")?,
            purged: count("purged")?,
            small: totals("small")?,
            large: totals("large")?,
            huge: totals("huge")?,
            bins,
            lruns,
            hchunks,
        })
    }
}
