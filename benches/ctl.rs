use criterion::{black_box, criterion_group, criterion_main, Criterion};
use jemalloc_introspect::ctl::{self, CtlName};
use jemalloc_introspect::sim::Simulated;
use jemalloc_introspect::Introspector;

fn bench_accessors(c: &mut Criterion) {
    let sim = Simulated::jemalloc4();
    let page = CtlName::new("arenas.page").unwrap();
    let version = CtlName::new("version").unwrap();

    c.bench_function("get_size", |b| {
        b.iter(|| black_box(ctl::get_size(&sim, &page).unwrap()));
    });
    c.bench_function("get_string", |b| {
        b.iter(|| black_box(ctl::get_string(&sim, &version).unwrap()));
    });
}

fn bench_queries(c: &mut Criterion) {
    let je = Introspector::new(Simulated::jemalloc4());
    je.sizes().unwrap();

    c.bench_function("sizes_cached", |b| {
        b.iter(|| black_box(je.sizes().unwrap().bins.len()));
    });
    c.bench_function("initialized_arenas", |b| {
        b.iter(|| black_box(je.initialized_arenas().unwrap()));
    });
    c.bench_function("arena_stats", |b| {
        b.iter(|| black_box(je.arena_stats(0).unwrap()));
    });
    c.bench_function("current_active", |b| {
        b.iter(|| black_box(je.current_active().unwrap()));
    });
}

criterion_group!(benches, bench_accessors, bench_queries);
criterion_main!(benches);
