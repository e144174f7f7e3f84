//! Query tests against the simulated allocator

use super::*;
use crate::ctl::CtlValue;
use crate::sim::Simulated;
use proptest::prelude::*;
use std::sync::Arc;

fn introspector() -> Introspector<Simulated> {
    Introspector::new(Simulated::jemalloc4())
}

/// `<major>.<minor>.<bugfix>-<nrev>-g<40 hex digits>`
fn is_release_version(v: &str) -> bool {
    let Some((release, rest)) = v.split_once('-') else {
        return false;
    };
    let Some((nrev, gid)) = rest.split_once('-') else {
        return false;
    };
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let parts: Vec<&str> = release.split('.').collect();
    parts.len() == 3
        && parts.iter().all(|&p| numeric(p))
        && numeric(nrev)
        && gid.len() == 41
        && gid.starts_with('g')
        && gid[1..].bytes().all(|b| b.is_ascii_hexdigit())
}

// ===== Version and configuration =====

#[test]
fn test_version_format() {
    let je = introspector();
    let version = je.version().unwrap().unwrap();
    assert!(is_release_version(&version), "{}", version);
    assert!(!is_release_version("4.5.0"));
    assert!(!is_release_version("4.5.0-0-gxyz"));
}

#[test]
fn test_supported_version_range() {
    assert!(is_supported_version("4.1.0-0-gdf900dbfaf4835d3efc06d771535f3e781544913"));
    assert!(is_supported_version("4.5.0-0-g04380e79f1e2428bd0ad000bbc6e3d2dfc6b66a5"));
    assert!(!is_supported_version("4.0.4-0-g91010a9e2ebfc84b1ac1ed7fdde3bfed4f65f180"));
    assert!(!is_supported_version("3.6.0-0-g46c0af68bd248b04df75e4f92d5fb804c3d75340"));
    assert!(!is_supported_version("5.3.0-0-g54eaed1d8b56b1aa528be3bdd1877e59c56fa90c"));
    assert!(!is_supported_version("4"));
    assert!(!is_supported_version(""));

    let je = introspector();
    assert!(is_supported_version(&je.version().unwrap().unwrap()));
}

#[test]
fn test_build_configuration_keys() {
    let je = introspector();
    let config = je.build_configuration().unwrap();
    let keys: Vec<&str> = config.keys().copied().collect();
    let mut expected = BUILD_FLAGS.to_vec();
    expected.sort_unstable();
    assert_eq!(keys, expected);
    assert_eq!(config["fill"], true);
    assert_eq!(config["debug"], false);
}

#[test]
fn test_compiled_malloc_conf() {
    let je = introspector();
    assert_eq!(je.compiled_malloc_conf().unwrap().as_deref(), Some(""));
}

#[test]
fn test_options_skip_disabled_features() {
    let je = introspector();
    let options = je.options().unwrap();
    assert_eq!(options["purge"], CtlValue::Str(Some("ratio".into())));
    assert_eq!(options["lg_chunk"], CtlValue::Size(21));
    assert_eq!(options["narenas"], CtlValue::U32(4));
    assert!(options.contains_key("junk"));
    assert!(options.contains_key("lg_tcache_max"));
    assert!(!options.contains_key("prof"));
    assert!(!options.contains_key("utrace"));
    assert!(!options.contains_key("xmalloc"));
}

#[test]
fn test_options_with_profiling() {
    let je = Introspector::new(Simulated::builder().config("prof", true).build());
    let options = je.options().unwrap();
    assert_eq!(options["prof_prefix"], CtlValue::Str(Some("jeprof".into())));
    assert_eq!(options["lg_prof_interval"], CtlValue::SSize(-1));
    assert!(options.contains_key("prof_thread_active_init"));
}

#[test]
fn test_options_fail_when_enabled_option_missing() {
    let je = introspector();
    je.backend().remove("opt.junk");
    let err = je.options().unwrap_err();
    assert_eq!(err.name(), Some("opt.junk"));
}

// ===== Arenas =====

#[test]
fn test_initialized_arenas() {
    let je = introspector();
    assert_eq!(je.arena_count().unwrap(), 4);
    let initialized: Vec<u32> = je.initialized_arenas().unwrap().into_iter().collect();
    assert_eq!(initialized, vec![0, 2]);
}

#[test]
fn test_initialized_arenas_not_cached() {
    let je = introspector();
    je.backend().set_initialized(&[1, 3]);
    let initialized: Vec<u32> = je.initialized_arenas().unwrap().into_iter().collect();
    assert_eq!(initialized, vec![1, 3]);
}

proptest! {
    #[test]
    fn test_initialized_arenas_within_count(
        narenas in 1u32..48,
        picks in proptest::collection::vec(0u32..64, 0..16),
    ) {
        let je = Introspector::new(Simulated::builder().narenas(narenas).initialized(&[]).build());
        je.backend().set_initialized(&picks);

        let initialized = je.initialized_arenas().unwrap();
        prop_assert!(initialized.iter().all(|&i| i < narenas));
        let expected: BTreeSet<u32> = picks.into_iter().filter(|&i| i < narenas).collect();
        prop_assert_eq!(initialized, expected);
    }
}

// ===== Size classes =====

#[test]
fn test_sizes_cached_by_identity() {
    let je = introspector();
    let first: *const SizeClassTable = je.sizes().unwrap();
    je.backend().reset_calls();
    let second: *const SizeClassTable = je.sizes().unwrap();
    assert!(ptr::eq(first, second));
    assert_eq!(je.backend().calls(), 0);
}

#[test]
fn test_sizes_shape() {
    let je = introspector();
    let sizes = je.sizes().unwrap();
    assert_eq!(sizes.quantum, 16);
    assert_eq!(sizes.page, 4096);
    assert_eq!(sizes.tcache_max, Some(32768));
    assert!(sizes.nhbins.unwrap() as usize > sizes.bins.len());

    assert_eq!(sizes.bins.len(), 36);
    for bin in &sizes.bins {
        assert!(bin.size > 0 && bin.nregs > 0 && bin.run_size > 0);
        assert_eq!(bin.run_size % sizes.page, 0);
        assert_eq!(bin.nregs as usize * bin.size, bin.run_size);
    }
    assert!(sizes.bins.windows(2).all(|w| w[0].size < w[1].size));
    assert!(sizes.large.windows(2).all(|w| w[0] < w[1]));
    assert!(sizes.huge.windows(2).all(|w| w[0] < w[1]));
    assert!(sizes.small_max().unwrap() < sizes.large[0]);
    assert!(sizes.large_max().unwrap() < sizes.huge[0]);
}

#[test]
fn test_bin_for_rounds_up() {
    let je = introspector();
    let sizes = je.sizes().unwrap();
    assert_eq!(sizes.bin_for(1).map(|b| b.size), Some(8));
    assert_eq!(sizes.bin_for(16).map(|b| b.size), Some(16));
    assert_eq!(sizes.bin_for(17).map(|b| b.size), Some(32));
    assert_eq!(sizes.bin_for(14336).map(|b| b.size), Some(14336));
    assert!(sizes.bin_for(14337).is_none());
}

#[test]
fn test_sizes_without_tcache() {
    let je = Introspector::new(Simulated::builder().config("tcache", false).build());
    let sizes = je.sizes().unwrap();
    assert!(!sizes.has_tcache());
    assert_eq!(sizes.nhbins, None);
}

#[test]
fn test_sizes_failure_not_cached() {
    let je = introspector();
    je.backend().remove("arenas.bin.3.nregs");
    let err = je.sizes().unwrap_err();
    assert_eq!(err.name(), Some("arenas.bin.3.nregs"));

    je.backend().set("arenas.bin.3.nregs", CtlValue::U32(64));
    assert_eq!(je.sizes().unwrap().bins[3].nregs, 64);
}

#[test]
fn test_sizes_shared_across_threads() {
    let je = Arc::new(introspector());
    let addrs: Vec<usize> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let je = Arc::clone(&je);
                s.spawn(move || je.sizes().unwrap() as *const SizeClassTable as usize)
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(addrs.windows(2).all(|w| w[0] == w[1]));
}

// ===== Statistics =====

#[test]
fn test_stats_snapshot() {
    let je = introspector();
    let stats = je.stats().unwrap();
    assert!(stats.allocated > 0);
    assert!(stats.active >= stats.allocated);
    assert!(stats.mapped > 0);
    assert!(stats.resident > 0);
    assert_eq!(stats.cactive, Some(stats.active));
    assert_eq!(stats.chunks, None);

    assert_eq!(stats.arenas.len(), 4);
    let present: Vec<u32> = stats.initialized().map(|a| a.index).collect();
    assert_eq!(present, vec![0, 2]);
    assert!(stats.arenas[1].is_none());
    assert!(stats.arenas[3].is_none());
}

#[test]
fn test_stats_allocated_is_sum_of_arenas() {
    let je = introspector();
    let stats = je.stats().unwrap();
    let sum: usize = stats
        .initialized()
        .map(|a| a.small.allocated + a.large.allocated + a.huge.allocated)
        .sum();
    assert_eq!(sum, stats.allocated);
}

#[test]
fn test_stats_sees_queued_values_after_refresh() {
    let je = introspector();
    je.backend().queue("stats.allocated", CtlValue::Size(777));
    assert_eq!(je.stats().unwrap().allocated, 777);
}

#[test]
fn test_refresh_advances_epoch() {
    let je = introspector();
    let a = je.refresh().unwrap();
    let b = je.refresh().unwrap();
    assert!(b > a);
}

#[test]
fn test_counters_monotonic_across_snapshots() {
    let je = introspector();
    let before = je.arena_stats(0).unwrap();
    je.backend().queue(
        "stats.arenas.0.small.nmalloc",
        CtlValue::U64(before.small.nmalloc + 10),
    );
    je.refresh().unwrap();
    let after = je.arena_stats(0).unwrap();
    assert!(after.small.nmalloc >= before.small.nmalloc);
    assert!(after.npurge >= before.npurge);
}

#[test]
fn test_arena_stats_refreshes_epoch() {
    let je = introspector();
    je.backend().queue("stats.arenas.2.npurge", CtlValue::U64(4242));
    assert_eq!(je.arena_stats(2).unwrap().npurge, 4242);

    je.backend().queue("stats.arenas.4.npurge", CtlValue::U64(9999));
    assert_eq!(je.merged_arena_stats().unwrap().npurge, 9999);
}

#[test]
fn test_stats_missing_property_fails_with_name() {
    let je = introspector();
    je.backend().remove("stats.arenas.2.pdirty");
    let err = je.stats().unwrap_err();
    assert_eq!(err.name(), Some("stats.arenas.2.pdirty"));
}

#[test]
fn test_chunk_stats_when_exposed() {
    let je = Introspector::new(Simulated::builder().chunk_stats(true).build());
    let chunks = je.stats().unwrap().chunks.unwrap();
    assert!(chunks.current > 0);
    assert!(chunks.high >= chunks.current);
    assert!(chunks.total >= chunks.current as u64);
}

#[test]
fn test_current_active_is_live() {
    let je = introspector();
    assert!(je.current_active().unwrap().unwrap() > 0);

    je.backend().store_cactive(12345);
    assert_eq!(je.current_active().unwrap(), Some(12345));

    je.backend().reset_calls();
    je.backend().store_cactive(54321);
    assert_eq!(je.current_active().unwrap(), Some(54321));
    assert_eq!(je.backend().calls(), 0);
}

#[test]
fn test_current_active_survives_slot_replacement() {
    let je = introspector();
    je.backend().store_cactive(424242);
    assert_eq!(je.current_active().unwrap(), Some(424242));

    je.backend().set("stats.cactive", CtlValue::Size(0));
    je.backend().remove("stats.cactive");
    je.backend().queue("stats.cactive", CtlValue::Size(0));
    je.refresh().unwrap();
    let churn: Vec<Box<u64>> = (0..10_000).map(|_| Box::new(0xdead_beef)).collect();

    assert_eq!(je.current_active().unwrap(), Some(424242));
    je.backend().store_cactive(7);
    assert_eq!(je.current_active().unwrap(), Some(7));
    drop(churn);
}

#[test]
fn test_arena_stats_sparse() {
    let je = introspector();
    let sizes = je.sizes().unwrap().clone();
    let arena = je.arena_stats(0).unwrap();

    assert_eq!(arena.index, 0);
    assert_eq!(arena.nthreads, 1);
    assert_eq!(arena.dss.as_deref(), Some("secondary"));
    assert!(!arena.bins.is_empty());
    assert!(arena.bins.len() < sizes.bins.len());
    for (size, bin) in &arena.bins {
        assert!(sizes.bins.iter().any(|b| b.size == *size));
        assert!(bin.nruns > 0);
        assert!(bin.nfills.is_some());
    }
    assert!(arena.lruns.values().all(|r| r.nrequests > 0));
    assert!(arena.hchunks.values().all(|h| h.nrequests > 0));
    assert!(arena.lruns.keys().all(|k| sizes.large.contains(k)));
    assert_eq!(arena.hchunks.keys().copied().collect::<Vec<_>>(), vec![2 << 20]);
}

#[test]
fn test_arena_stats_without_tcache() {
    let je = Introspector::new(Simulated::builder().config("tcache", false).build());
    let arena = je.arena_stats(2).unwrap();
    assert!(arena.bins.values().all(|b| b.nfills.is_none() && b.nflushes.is_none()));
}

#[test]
fn test_arena_stats_not_initialized() {
    let je = introspector();
    assert_eq!(
        je.arena_stats(1).unwrap_err(),
        CtlError::NotInitialized { index: 1 }
    );
    assert_eq!(
        je.arena_stats(99).unwrap_err(),
        CtlError::NotInitialized { index: 99 }
    );
}

#[test]
fn test_merged_arena_stats() {
    let je = introspector();
    let merged = je.merged_arena_stats().unwrap();
    let a0 = je.arena_stats(0).unwrap();
    let a2 = je.arena_stats(2).unwrap();
    assert_eq!(merged.index, 4);
    assert_eq!(merged.nthreads, a0.nthreads + a2.nthreads);
    assert_eq!(merged.pactive, a0.pactive + a2.pactive);
    assert_eq!(merged.small.nmalloc, a0.small.nmalloc + a2.small.nmalloc);
}

// ===== Report =====

#[test]
fn test_stats_report() {
    let je = introspector();
    let report = je.stats_report(None).unwrap();
    assert!(report.starts_with("___ Begin jemalloc statistics ___"));
    assert!(report.contains("Version: 4.5.0"));
    assert!(report.contains("Current active ceiling:"));
    assert!(report.trim_end().ends_with("--- End jemalloc statistics ---"));
}

#[test]
fn test_stats_report_options_pass_through() {
    let je = introspector();
    let report = je.stats_report(Some("gm")).unwrap();
    assert!(!report.contains("Version:"));
    assert!(!report.contains("Allocated:"));

    assert!(matches!(
        je.stats_report(Some("g\0")),
        Err(CtlError::InvalidName { .. })
    ));
}

/// Backend that only records how the report entry point was called
#[derive(Default)]
struct DumpRecorder {
    /// (callback given, opts given) per call
    dumps: parking_lot::Mutex<Vec<(bool, bool)>>,
}

impl Mallctl for DumpRecorder {
    unsafe fn mallctl(
        &self,
        _name: &CStr,
        _oldp: *mut c_void,
        _oldlenp: *mut usize,
        _newp: *mut c_void,
        _newlen: usize,
    ) -> core::ffi::c_int {
        2
    }

    unsafe fn malloc_stats_print(
        &self,
        write_cb: Option<WriteCb>,
        _opaque: *mut c_void,
        opts: *const c_char,
    ) {
        self.dumps.lock().push((write_cb.is_some(), !opts.is_null()));
    }
}

#[test]
fn test_stats_print_uses_default_destination() {
    let je = Introspector::new(DumpRecorder::default());
    je.stats_print();
    assert_eq!(*je.backend().dumps.lock(), vec![(false, false)]);
}

#[test]
fn test_stats_report_installs_callback() {
    let je = Introspector::new(DumpRecorder::default());
    assert_eq!(je.stats_report(Some("a")).unwrap(), "");
    assert_eq!(je.stats_report(None).unwrap(), "");
    assert_eq!(*je.backend().dumps.lock(), vec![(true, true), (true, false)]);
}
