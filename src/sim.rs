//! In-process stand-in for a jemalloc 4.x control interface
//!
//! [`Simulated`] answers `mallctl` from a property table with the same return
//! codes jemalloc uses: `ENOENT` for unknown names, `EINVAL` for a length that
//! does not match the property, `EPERM` for writes to read-only properties.
//! Statistics queued with [`Simulated::queue`] only become visible after the
//! `epoch` is written, like jemalloc's cached statistics.
//!
//! Built for the crate's own tests, and behind the `sim` feature for the
//! benches and downstream tests that need an allocator they can script.

use crate::ctl::{CtlValue, Mallctl, WriteCb};
use core::ffi::{c_char, c_int, c_void};
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ffi::{CStr, CString};
use std::sync::Arc;

const EPERM: c_int = 1;
const ENOENT: c_int = 2;
const EINVAL: c_int = 22;

const PAGE: usize = 4096;
const QUANTUM: usize = 16;
const CHUNK: usize = 2 << 20;
const LARGE_MAX: usize = CHUNK - (CHUNK >> 3);
const HUGE_LIMIT: usize = 64 << 20;
const TCACHE_MAX: usize = 32 << 10;

enum Slot {
    Bool(bool),
    Size(usize),
    SSize(isize),
    U32(u32),
    U64(u64),
    Str(Option<CString>),
    Bools(Vec<bool>),
    /// Pointer-valued property; the pointee stays put while the value changes
    Counter(Arc<AtomicUsize>),
}

impl Slot {
    fn from_value(value: CtlValue) -> Self {
        match value {
            CtlValue::Bool(v) => Self::Bool(v),
            CtlValue::Size(v) => Self::Size(v),
            CtlValue::SSize(v) => Self::SSize(v),
            CtlValue::U32(v) => Self::U32(v),
            CtlValue::U64(v) => Self::U64(v),
            CtlValue::Str(s) => {
                Self::Str(s.map(|s| CString::new(s.replace('\0', "")).unwrap_or_default()))
            }
        }
    }

    fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Bool(v) => vec![*v as u8],
            Self::Size(v) => v.to_ne_bytes().to_vec(),
            Self::SSize(v) => v.to_ne_bytes().to_vec(),
            Self::U32(v) => v.to_ne_bytes().to_vec(),
            Self::U64(v) => v.to_ne_bytes().to_vec(),
            Self::Str(s) => {
                let addr = s.as_ref().map_or(0, |s| s.as_ptr() as usize);
                addr.to_ne_bytes().to_vec()
            }
            Self::Bools(v) => v.iter().map(|b| *b as u8).collect(),
            Self::Counter(c) => (Arc::as_ptr(c) as usize).to_ne_bytes().to_vec(),
        }
    }

    fn store(&mut self, bytes: &[u8]) -> Result<(), c_int> {
        match self {
            Self::Bool(v) if bytes.len() == 1 => *v = bytes[0] != 0,
            Self::Size(v) => *v = usize::from_ne_bytes(bytes.try_into().map_err(|_| EINVAL)?),
            Self::SSize(v) => *v = isize::from_ne_bytes(bytes.try_into().map_err(|_| EINVAL)?),
            Self::U32(v) => *v = u32::from_ne_bytes(bytes.try_into().map_err(|_| EINVAL)?),
            Self::U64(v) => *v = u64::from_ne_bytes(bytes.try_into().map_err(|_| EINVAL)?),
            _ => return Err(EINVAL),
        }
        Ok(())
    }

    fn display(&self) -> String {
        match self {
            Self::Bool(v) => v.to_string(),
            Self::Size(v) => v.to_string(),
            Self::SSize(v) => v.to_string(),
            Self::U32(v) => v.to_string(),
            Self::U64(v) => v.to_string(),
            Self::Str(Some(s)) => s.to_string_lossy().into_owned(),
            Self::Str(None) => "(null)".into(),
            Self::Bools(v) => format!("{:?}", v),
            Self::Counter(c) => c.load(Ordering::Relaxed).to_string(),
        }
    }
}

struct Entry {
    slot: Slot,
    writable: bool,
}

#[derive(Default)]
struct Table {
    props: HashMap<String, Entry>,
    /// Statistics published on the next epoch write
    pending: Vec<(String, Slot)>,
}

impl Table {
    fn insert(&mut self, name: impl Into<String>, slot: Slot) {
        self.props.insert(
            name.into(),
            Entry {
                slot,
                writable: false,
            },
        );
    }

    fn insert_writable(&mut self, name: impl Into<String>, slot: Slot) {
        self.props.insert(
            name.into(),
            Entry {
                slot,
                writable: true,
            },
        );
    }

    fn advance_epoch(&mut self) {
        for (name, slot) in self.pending.drain(..) {
            let writable = self.props.get(&name).map_or(false, |e| e.writable);
            self.props.insert(name, Entry { slot, writable });
        }
        if let Some(Entry {
            slot: Slot::U64(epoch),
            ..
        }) = self.props.get_mut("epoch")
        {
            *epoch += 1;
        }
    }

    fn show(&self, name: &str) -> String {
        self.props
            .get(name)
            .map_or_else(|| "N/A".to_string(), |e| e.slot.display())
    }
}

/// Scriptable jemalloc 4.x control interface
pub struct Simulated {
    table: Mutex<Table>,
    calls: AtomicUsize,
    /// Backing store of `stats.cactive`; outlives any replacement of its slot
    cactive: Arc<AtomicUsize>,
}

impl Simulated {
    /// A 4-arena allocator with arenas 0 and 2 initialized and a default build
    pub fn jemalloc4() -> Self {
        SimBuilder::default().build()
    }

    pub fn builder() -> SimBuilder {
        SimBuilder::default()
    }

    /// Number of `mallctl` calls served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::Relaxed);
    }

    /// Set or replace a read-only property immediately
    pub fn set(&self, name: &str, value: CtlValue) {
        self.table.lock().insert(name, Slot::from_value(value));
    }

    /// Stage a statistic; it becomes visible after the next epoch write
    pub fn queue(&self, name: &str, value: CtlValue) {
        self.table
            .lock()
            .pending
            .push((name.to_owned(), Slot::from_value(value)));
    }

    /// Drop a property so that querying it fails with `ENOENT`
    pub fn remove(&self, name: &str) {
        self.table.lock().props.remove(name);
    }

    /// Replace the `arenas.initialized` bitmap (length stays `arenas.narenas`)
    pub fn set_initialized(&self, indices: &[u32]) {
        let mut table = self.table.lock();
        let Some(Entry {
            slot: Slot::Bools(bits),
            ..
        }) = table.props.get_mut("arenas.initialized")
        else {
            return;
        };
        bits.iter_mut().for_each(|b| *b = false);
        for &i in indices {
            if let Some(b) = bits.get_mut(i as usize) {
                *b = true;
            }
        }
    }

    /// Move the live `stats.cactive` counter without an epoch change
    pub fn store_cactive(&self, value: usize) {
        self.cactive.store(value, Ordering::Relaxed);
    }

    fn report(&self, opts: &str) -> Vec<String> {
        let table = self.table.lock();
        let mut lines = vec!["___ Begin jemalloc statistics ___\n".to_string()];

        if !opts.contains('g') {
            lines.push(format!("Version: {}\n", table.show("version")));
            let mut flags: Vec<(&String, &Entry)> = table
                .props
                .iter()
                .filter(|(k, e)| k.starts_with("config.") && matches!(e.slot, Slot::Bool(_)))
                .collect();
            flags.sort_by(|a, b| a.0.cmp(b.0));
            for (name, entry) in flags {
                lines.push(format!("{}: {}\n", name, entry.slot.display()));
            }
            lines.push(format!("Arenas: {}\n", table.show("arenas.narenas")));
            lines.push(format!("Quantum size: {}\n", table.show("arenas.quantum")));
            lines.push(format!("Page size: {}\n", table.show("arenas.page")));
        }

        if !opts.contains('m') {
            lines.push(format!(
                "Allocated: {}, active: {}, metadata: {}, resident: {}, mapped: {}\n",
                table.show("stats.allocated"),
                table.show("stats.active"),
                table.show("stats.metadata"),
                table.show("stats.resident"),
                table.show("stats.mapped"),
            ));
            lines.push(format!("Current active ceiling: {}\n", table.show("stats.cactive")));
        }

        lines.push("--- End jemalloc statistics ---\n".to_string());
        lines
    }
}

impl Mallctl for Simulated {
    unsafe fn mallctl(
        &self,
        name: &CStr,
        oldp: *mut c_void,
        oldlenp: *mut usize,
        newp: *mut c_void,
        newlen: usize,
    ) -> c_int {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let Ok(key) = name.to_str() else {
            return ENOENT;
        };
        let mut table = self.table.lock();

        if !newp.is_null() {
            let Some(entry) = table.props.get_mut(key) else {
                return ENOENT;
            };
            if !entry.writable {
                return EPERM;
            }
            if key == "epoch" {
                // Any 64-bit write advances the epoch; the value is ignored.
                if newlen != 8 {
                    return EINVAL;
                }
                table.advance_epoch();
            } else {
                let bytes = core::slice::from_raw_parts(newp as *const u8, newlen);
                if let Err(code) = entry.slot.store(bytes) {
                    return code;
                }
            }
        }

        let Some(entry) = table.props.get(key) else {
            return ENOENT;
        };

        if !oldp.is_null() {
            if oldlenp.is_null() {
                return EINVAL;
            }
            let bytes = entry.slot.bytes();
            let copy_len = bytes.len().min(*oldlenp);
            ptr::copy_nonoverlapping(bytes.as_ptr(), oldp as *mut u8, copy_len);
            if *oldlenp != bytes.len() {
                *oldlenp = copy_len;
                return EINVAL;
            }
        }

        0
    }

    unsafe fn malloc_stats_print(
        &self,
        write_cb: Option<WriteCb>,
        opaque: *mut c_void,
        opts: *const c_char,
    ) {
        let opts = if opts.is_null() {
            String::new()
        } else {
            CStr::from_ptr(opts).to_string_lossy().into_owned()
        };

        for line in self.report(&opts) {
            match write_cb {
                Some(cb) => {
                    if let Ok(c) = CString::new(line) {
                        cb(opaque, c.as_ptr());
                    }
                }
                None => eprint!("{}", line),
            }
        }
    }
}

/// Shape of a [`Simulated`] allocator
#[derive(Debug, Clone)]
pub struct SimBuilder {
    version: String,
    narenas: u32,
    initialized: Vec<u32>,
    config: BTreeMap<&'static str, bool>,
    chunk_stats: bool,
}

impl Default for SimBuilder {
    fn default() -> Self {
        let config = [
            ("cache_oblivious", true),
            ("debug", false),
            ("fill", true),
            ("lazy_lock", false),
            ("munmap", false),
            ("prof", false),
            ("prof_libgcc", false),
            ("prof_libunwind", false),
            ("stats", true),
            ("tcache", true),
            ("tls", true),
            ("utrace", false),
            ("valgrind", false),
            ("xmalloc", false),
        ]
        .into_iter()
        .collect();

        Self {
            version: "4.5.0-0-g04380e79f1e2428bd0ad000bbc6e3d2dfc6b66a5".into(),
            narenas: 4,
            initialized: vec![0, 2],
            config,
            chunk_stats: false,
        }
    }
}

impl SimBuilder {
    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_owned();
        self
    }

    pub fn narenas(mut self, narenas: u32) -> Self {
        self.narenas = narenas;
        self
    }

    /// Arenas to initialize; indices `>= narenas` are ignored
    pub fn initialized(mut self, indices: &[u32]) -> Self {
        self.initialized = indices.to_vec();
        self
    }

    /// Set a `config.*` build flag
    pub fn config(mut self, flag: &'static str, enabled: bool) -> Self {
        self.config.insert(flag, enabled);
        self
    }

    /// Expose the 3.x `stats.chunks.*` counters
    pub fn chunk_stats(mut self, enabled: bool) -> Self {
        self.chunk_stats = enabled;
        self
    }

    fn flag(&self, name: &str) -> bool {
        self.config.get(name).copied().unwrap_or(false)
    }

    pub fn build(self) -> Simulated {
        let mut t = Table::default();
        let tcache = self.flag("tcache");

        t.insert("version", Slot::Str(CString::new(self.version.clone()).ok()));
        t.insert_writable("epoch", Slot::U64(1));

        for (flag, enabled) in &self.config {
            t.insert(format!("config.{}", flag), Slot::Bool(*enabled));
        }
        t.insert("config.malloc_conf", Slot::Str(CString::new("").ok()));

        self.insert_options(&mut t);

        // Size classes
        let small = small_classes();
        let large = large_classes();
        let huge = huge_classes();

        t.insert("arenas.quantum", Slot::Size(QUANTUM));
        t.insert("arenas.page", Slot::Size(PAGE));
        if tcache {
            let cached_large = large.iter().filter(|&&s| s <= TCACHE_MAX).count();
            t.insert("arenas.tcache_max", Slot::Size(TCACHE_MAX));
            t.insert("arenas.nhbins", Slot::U32((small.len() + cached_large) as u32));
        }
        t.insert("arenas.nbins", Slot::U32(small.len() as u32));
        for (j, &size) in small.iter().enumerate() {
            let run_size = lcm(size, PAGE);
            t.insert(format!("arenas.bin.{}.size", j), Slot::Size(size));
            t.insert(format!("arenas.bin.{}.nregs", j), Slot::U32((run_size / size) as u32));
            t.insert(format!("arenas.bin.{}.run_size", j), Slot::Size(run_size));
        }
        t.insert("arenas.nlruns", Slot::U32(large.len() as u32));
        for (j, &size) in large.iter().enumerate() {
            t.insert(format!("arenas.lrun.{}.size", j), Slot::Size(size));
        }
        t.insert("arenas.nhchunks", Slot::U32(huge.len() as u32));
        for (j, &size) in huge.iter().enumerate() {
            t.insert(format!("arenas.hchunk.{}.size", j), Slot::Size(size));
        }

        // Arenas
        let mut bits = vec![false; self.narenas as usize];
        let mut live = Vec::new();
        for &i in &self.initialized {
            if let Some(b) = bits.get_mut(i as usize) {
                if !*b {
                    *b = true;
                    live.push(i);
                }
            }
        }
        live.sort_unstable();
        t.insert("arenas.narenas", Slot::U32(self.narenas));
        t.insert("arenas.initialized", Slot::Bools(bits));

        let samples: Vec<ArenaSample> = live
            .iter()
            .map(|&i| ArenaSample::generate(i, &small, &large, &huge, tcache))
            .collect();
        for (sample, &i) in samples.iter().zip(&live) {
            sample.install(&mut t, i);
        }
        let merged = ArenaSample::merge(&samples, small.len(), large.len(), huge.len(), tcache);
        merged.install(&mut t, self.narenas);

        // Globals
        let cactive = Arc::new(AtomicUsize::new(merged.active_bytes()));
        t.insert("stats.cactive", Slot::Counter(Arc::clone(&cactive)));
        t.insert("stats.allocated", Slot::Size(merged.allocated()));
        t.insert("stats.active", Slot::Size(merged.active_bytes()));
        t.insert("stats.metadata", Slot::Size(merged.metadata_mapped + (64 << 10)));
        t.insert(
            "stats.resident",
            Slot::Size(merged.active_bytes() + merged.metadata_mapped + (64 << 10)),
        );
        t.insert("stats.mapped", Slot::Size(merged.mapped + CHUNK));
        if self.chunk_stats {
            let chunks = merged.mapped / CHUNK + 1;
            t.insert("stats.chunks.current", Slot::Size(chunks));
            t.insert("stats.chunks.total", Slot::U64(chunks as u64 + 3));
            t.insert("stats.chunks.high", Slot::Size(chunks + 1));
        }

        Simulated {
            table: Mutex::new(t),
            calls: AtomicUsize::new(0),
            cactive,
        }
    }

    fn insert_options(&self, t: &mut Table) {
        let str_slot = |s: &str| Slot::Str(CString::new(s).ok());

        t.insert("opt.abort", Slot::Bool(false));
        t.insert("opt.dss", str_slot("secondary"));
        t.insert("opt.lg_chunk", Slot::Size(21));
        t.insert("opt.narenas", Slot::U32(self.narenas));
        t.insert("opt.purge", str_slot("ratio"));
        t.insert("opt.lg_dirty_mult", Slot::SSize(3));
        t.insert("opt.decay_time", Slot::SSize(10));
        t.insert("opt.stats_print", Slot::Bool(false));
        if self.flag("fill") {
            t.insert("opt.junk", str_slot("false"));
            t.insert("opt.quarantine", Slot::Size(0));
            t.insert("opt.redzone", Slot::Bool(false));
            t.insert("opt.zero", Slot::Bool(false));
        }
        if self.flag("utrace") {
            t.insert("opt.utrace", Slot::Bool(false));
        }
        if self.flag("xmalloc") {
            t.insert("opt.xmalloc", Slot::Bool(false));
        }
        if self.flag("tcache") {
            t.insert("opt.tcache", Slot::Bool(true));
            t.insert("opt.lg_tcache_max", Slot::SSize(15));
        }
        if self.flag("prof") {
            t.insert("opt.prof", Slot::Bool(false));
            t.insert("opt.prof_prefix", str_slot("jeprof"));
            t.insert("opt.prof_active", Slot::Bool(true));
            t.insert("opt.prof_thread_active_init", Slot::Bool(true));
            t.insert("opt.lg_prof_sample", Slot::Size(19));
            t.insert("opt.prof_accum", Slot::Bool(false));
            t.insert("opt.lg_prof_interval", Slot::SSize(-1));
            t.insert("opt.prof_gdump", Slot::Bool(false));
            t.insert("opt.prof_final", Slot::Bool(false));
            t.insert("opt.prof_leak", Slot::Bool(false));
        }
    }
}

/// Per-class activity counters: nmalloc, ndalloc, nrequests, current count
#[derive(Debug, Clone, Copy, Default)]
struct Activity {
    nmalloc: u64,
    ndalloc: u64,
    nrequests: u64,
    current: usize,
}

impl Activity {
    fn add(&mut self, other: &Activity) {
        self.nmalloc += other.nmalloc;
        self.ndalloc += other.ndalloc;
        self.nrequests += other.nrequests;
        self.current += other.current;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BinSample {
    activity: Activity,
    curregs: usize,
    nfills: u64,
    nflushes: u64,
    nruns: u64,
    nreruns: u64,
}

#[derive(Debug, Clone, Default)]
struct ArenaSample {
    nthreads: u32,
    tcache: bool,
    pactive: usize,
    pdirty: usize,
    mapped: usize,
    metadata_mapped: usize,
    metadata_allocated: usize,
    npurge: u64,
    nmadvise: u64,
    purged: u64,
    small_allocated: usize,
    large_allocated: usize,
    huge_allocated: usize,
    bins: Vec<BinSample>,
    lruns: Vec<Activity>,
    hchunks: Vec<Activity>,
}

impl ArenaSample {
    fn generate(i: u32, small: &[usize], large: &[usize], huge: &[usize], tcache: bool) -> Self {
        let s = i as u64 + 1;
        let mut sample = Self {
            nthreads: s as u32,
            tcache,
            ..Self::default()
        };

        for (j, &size) in small.iter().enumerate() {
            let mut bin = BinSample::default();
            if (j + i as usize) % 3 == 0 {
                let k = j as u64 + 1;
                bin = BinSample {
                    activity: Activity {
                        nmalloc: 100 * k * s,
                        ndalloc: 40 * k * s,
                        nrequests: 150 * k * s,
                        current: 1,
                    },
                    curregs: (60 * k * s) as usize,
                    nfills: if tcache { 10 * s } else { 0 },
                    nflushes: if tcache { 4 * s } else { 0 },
                    nruns: k,
                    nreruns: k / 2,
                };
                sample.small_allocated += bin.curregs * size;
            }
            sample.bins.push(bin);
        }

        for (j, &size) in large.iter().enumerate() {
            let mut run = Activity::default();
            if j % 4 == i as usize % 4 {
                run = Activity {
                    nmalloc: 5 * s,
                    ndalloc: 2 * s,
                    nrequests: 5 * s,
                    current: 3 * s as usize,
                };
                sample.large_allocated += run.current * size;
            }
            sample.lruns.push(run);
        }

        for (j, &size) in huge.iter().enumerate() {
            let mut chunk = Activity::default();
            if j == i as usize % 3 {
                chunk = Activity {
                    nmalloc: 1,
                    ndalloc: 0,
                    nrequests: 1,
                    current: 1,
                };
                sample.huge_allocated += size;
            }
            sample.hchunks.push(chunk);
        }

        sample.pactive = (sample.allocated() + PAGE - 1) / PAGE;
        sample.pdirty = 2 * s as usize;
        sample.mapped = sample.pactive * PAGE + 2 * CHUNK;
        sample.metadata_mapped = 8192 * s as usize;
        sample.metadata_allocated = 4096 * s as usize;
        sample.npurge = 3 * s;
        sample.nmadvise = 7 * s;
        sample.purged = 21 * s;
        sample
    }

    fn merge(samples: &[Self], nbins: usize, nlruns: usize, nhchunks: usize, tcache: bool) -> Self {
        let mut merged = Self {
            tcache,
            bins: vec![BinSample::default(); nbins],
            lruns: vec![Activity::default(); nlruns],
            hchunks: vec![Activity::default(); nhchunks],
            ..Self::default()
        };
        for s in samples {
            merged.nthreads += s.nthreads;
            merged.pactive += s.pactive;
            merged.pdirty += s.pdirty;
            merged.mapped += s.mapped;
            merged.metadata_mapped += s.metadata_mapped;
            merged.metadata_allocated += s.metadata_allocated;
            merged.npurge += s.npurge;
            merged.nmadvise += s.nmadvise;
            merged.purged += s.purged;
            merged.small_allocated += s.small_allocated;
            merged.large_allocated += s.large_allocated;
            merged.huge_allocated += s.huge_allocated;
            for (m, b) in merged.bins.iter_mut().zip(&s.bins) {
                m.activity.add(&b.activity);
                m.curregs += b.curregs;
                m.nfills += b.nfills;
                m.nflushes += b.nflushes;
                m.nruns += b.nruns;
                m.nreruns += b.nreruns;
            }
            for (m, r) in merged.lruns.iter_mut().zip(&s.lruns) {
                m.add(r);
            }
            for (m, h) in merged.hchunks.iter_mut().zip(&s.hchunks) {
                m.add(h);
            }
        }
        merged
    }

    fn allocated(&self) -> usize {
        self.small_allocated + self.large_allocated + self.huge_allocated
    }

    fn active_bytes(&self) -> usize {
        self.pactive * PAGE
    }

    fn install(&self, t: &mut Table, i: u32) {
        let p = format!("stats.arenas.{}.", i);
        t.insert(format!("{}nthreads", p), Slot::U32(self.nthreads));
        t.insert(format!("{}dss", p), Slot::Str(CString::new("secondary").ok()));
        t.insert(format!("{}lg_dirty_mult", p), Slot::SSize(3));
        t.insert(format!("{}decay_time", p), Slot::SSize(10));
        t.insert(format!("{}pactive", p), Slot::Size(self.pactive));
        t.insert(format!("{}pdirty", p), Slot::Size(self.pdirty));
        t.insert(format!("{}mapped", p), Slot::Size(self.mapped));
        t.insert(format!("{}metadata.mapped", p), Slot::Size(self.metadata_mapped));
        t.insert(format!("{}metadata.allocated", p), Slot::Size(self.metadata_allocated));
        t.insert(format!("{}npurge", p), Slot::U64(self.npurge));
        t.insert(format!("{}nmadvise", p), Slot::U64(self.nmadvise));
        t.insert(format!("{}purged", p), Slot::U64(self.purged));

        let sum = |items: &mut dyn Iterator<Item = Activity>| {
            items.fold(Activity::default(), |mut acc, a| {
                acc.add(&a);
                acc
            })
        };
        let classes = [
            ("small", self.small_allocated, sum(&mut self.bins.iter().map(|b| b.activity))),
            ("large", self.large_allocated, sum(&mut self.lruns.iter().copied())),
            ("huge", self.huge_allocated, sum(&mut self.hchunks.iter().copied())),
        ];
        for (class, allocated, totals) in classes {
            t.insert(format!("{}{}.allocated", p, class), Slot::Size(allocated));
            t.insert(format!("{}{}.nmalloc", p, class), Slot::U64(totals.nmalloc));
            t.insert(format!("{}{}.ndalloc", p, class), Slot::U64(totals.ndalloc));
            t.insert(format!("{}{}.nrequests", p, class), Slot::U64(totals.nrequests));
        }

        for (j, bin) in self.bins.iter().enumerate() {
            let b = format!("{}bins.{}.", p, j);
            t.insert(format!("{}nmalloc", b), Slot::U64(bin.activity.nmalloc));
            t.insert(format!("{}ndalloc", b), Slot::U64(bin.activity.ndalloc));
            t.insert(format!("{}nrequests", b), Slot::U64(bin.activity.nrequests));
            t.insert(format!("{}curregs", b), Slot::Size(bin.curregs));
            if self.tcache {
                t.insert(format!("{}nfills", b), Slot::U64(bin.nfills));
                t.insert(format!("{}nflushes", b), Slot::U64(bin.nflushes));
            }
            t.insert(format!("{}nruns", b), Slot::U64(bin.nruns));
            t.insert(format!("{}nreruns", b), Slot::U64(bin.nreruns));
            t.insert(format!("{}curruns", b), Slot::Size(bin.activity.current));
        }

        for (j, run) in self.lruns.iter().enumerate() {
            let r = format!("{}lruns.{}.", p, j);
            t.insert(format!("{}nmalloc", r), Slot::U64(run.nmalloc));
            t.insert(format!("{}ndalloc", r), Slot::U64(run.ndalloc));
            t.insert(format!("{}nrequests", r), Slot::U64(run.nrequests));
            t.insert(format!("{}curruns", r), Slot::Size(run.current));
        }

        for (j, chunk) in self.hchunks.iter().enumerate() {
            let h = format!("{}hchunks.{}.", p, j);
            t.insert(format!("{}nmalloc", h), Slot::U64(chunk.nmalloc));
            t.insert(format!("{}ndalloc", h), Slot::U64(chunk.ndalloc));
            t.insert(format!("{}nrequests", h), Slot::U64(chunk.nrequests));
            t.insert(format!("{}curhchunks", h), Slot::Size(chunk.current));
        }
    }
}

/// Small classes for a 16-byte quantum and 4 KiB pages: one tiny class, the
/// quantum multiples up to 64, then four classes per doubling.
fn small_classes() -> Vec<usize> {
    let mut sizes = vec![8];
    sizes.extend((1..=4).map(|k| k * QUANTUM));
    let mut base = 64;
    while base < 8192 {
        sizes.extend((1..=4).map(|k| base + k * base / 4));
        base *= 2;
    }
    sizes.extend([10240, 12288, 14336]);
    sizes
}

fn large_classes() -> Vec<usize> {
    doubling_groups(16 << 10, LARGE_MAX)
}

fn huge_classes() -> Vec<usize> {
    doubling_groups(CHUNK, HUGE_LIMIT)
}

fn doubling_groups(start: usize, max: usize) -> Vec<usize> {
    let mut sizes = vec![start];
    let mut base = start;
    'outer: loop {
        for k in 1..=4 {
            let size = base + k * base / 4;
            if size > max {
                break 'outer;
            }
            sizes.push(size);
        }
        base *= 2;
    }
    sizes
}

fn lcm(a: usize, b: usize) -> usize {
    fn gcd(a: usize, b: usize) -> usize {
        if b == 0 {
            a
        } else {
            gcd(b, a % b)
        }
    }
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_tables_have_jemalloc4_shape() {
        let small = small_classes();
        assert_eq!(small.len(), 36);
        assert_eq!(small.last(), Some(&14336));
        assert!(small.windows(2).all(|w| w[0] < w[1]));

        let large = large_classes();
        assert_eq!(large[0], 16384);
        assert_eq!(large.last(), Some(&LARGE_MAX));

        let huge = huge_classes();
        assert_eq!(huge[0], CHUNK);
        assert!(huge.iter().all(|&s| s <= HUGE_LIMIT));
    }

    #[test]
    fn unknown_name_is_enoent() {
        let sim = Simulated::jemalloc4();
        let name = CString::new("opt.nonexistent").unwrap();
        let mut out = 0u64;
        let mut len = 8usize;
        let status = unsafe {
            sim.mallctl(
                &name,
                &mut out as *mut u64 as *mut c_void,
                &mut len,
                ptr::null_mut(),
                0,
            )
        };
        assert_eq!(status, ENOENT);
        assert_eq!(sim.calls(), 1);
    }

    #[test]
    fn short_buffer_is_einval_with_partial_copy() {
        let sim = Simulated::jemalloc4();
        let name = CString::new("epoch").unwrap();
        let mut out = [0u8; 4];
        let mut len = out.len();
        let status = unsafe {
            sim.mallctl(
                &name,
                out.as_mut_ptr() as *mut c_void,
                &mut len,
                ptr::null_mut(),
                0,
            )
        };
        assert_eq!(status, EINVAL);
        assert_eq!(len, 4);
    }

    #[test]
    fn read_only_write_is_eperm() {
        let sim = Simulated::jemalloc4();
        let name = CString::new("arenas.page").unwrap();
        let mut value = 8192usize;
        let status = unsafe {
            sim.mallctl(
                &name,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut value as *mut usize as *mut c_void,
                core::mem::size_of::<usize>(),
            )
        };
        assert_eq!(status, EPERM);
    }

    #[test]
    fn queued_values_wait_for_epoch() {
        let sim = Simulated::jemalloc4();
        sim.queue("stats.allocated", CtlValue::Size(1));
        assert_ne!(sim.table.lock().show("stats.allocated"), "1");
        sim.table.lock().advance_epoch();
        assert_eq!(sim.table.lock().show("stats.allocated"), "1");
    }

    #[test]
    fn report_goes_through_callback() {
        unsafe extern "C" fn collect(opaque: *mut c_void, msg: *const c_char) {
            let out = &mut *(opaque as *mut String);
            out.push_str(&CStr::from_ptr(msg).to_string_lossy());
        }

        let sim = Simulated::jemalloc4();
        let mut out = String::new();
        unsafe {
            sim.malloc_stats_print(
                Some(collect),
                &mut out as *mut String as *mut c_void,
                ptr::null(),
            );
        }
        assert!(out.starts_with("___ Begin jemalloc statistics ___"));
        assert!(out.contains("Version: 4.5.0"));
        assert!(out.trim_end().ends_with("--- End jemalloc statistics ---"));
    }
}
