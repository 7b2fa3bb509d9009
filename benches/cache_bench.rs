//! Benchmarks for the object cache and dependency materialization
//!
//! Run with: cargo bench

use compdeps::store::groups;
use compdeps::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn filled_cache(size: i64) -> ObjectCache<Algorithm> {
    let cache = ObjectCache::new(Duration::from_secs(3600));
    for i in 0..size {
        cache.put(Algorithm::new(AlgorithmId(i), format!("Algorithm{}", i)).with_parm("input", "i"));
    }
    cache
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    for size in [100, 10000] {
        let cache = filled_cache(size);
        let key = AlgorithmId(size / 2);
        let name = format!("algorithm{}", size / 2);

        group.bench_function(format!("get_by_key_{}", size), |b| {
            b.iter(|| cache.get_by_key(black_box(key)))
        });

        group.bench_function(format!("get_by_name_{}", size), |b| {
            b.iter(|| cache.get_by_name(black_box(&name)))
        });

        group.bench_function(format!("search_{}", size), |b| {
            b.iter(|| cache.search(|a| a.id == black_box(key)))
        });
    }

    group.bench_function("put", |b| {
        let cache = ObjectCache::new(Duration::from_secs(3600));
        let mut i = 0;
        b.iter(|| {
            i += 1;
            cache.put(Algorithm::new(AlgorithmId(i % 1000), format!("Algorithm{}", i % 1000)))
        });
    });

    group.finish();
}

fn bench_materialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("materialize");

    for members in [10, 1000] {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .transaction(|tx| {
                for i in 0..members {
                    groups::add_member(tx, GroupId(1), TsKey(i))?;
                }
                Ok(())
            })
            .unwrap();

        let materializer = DependencyMaterializer::new(
            store.clone(),
            ReferenceCaches::default(),
            Collaborators::standalone(store.clone()),
        );
        let comp = Computation::new(CompId(1), "group average")
            .group(GroupId(1))
            .parm(CompParm::input("input"))
            .parm(CompParm::output("output"));

        group.throughput(Throughput::Elements(members as u64));
        group.bench_function(format!("group_{}", members), |b| {
            b.iter(|| materializer.materialize(black_box(&comp)).unwrap())
        });
    }

    group.bench_function("affected_by_on_disk", |b| {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("bench.db")).unwrap());
        let materializer = DependencyMaterializer::new(
            store.clone(),
            ReferenceCaches::default(),
            Collaborators::standalone(store.clone()),
        );
        for i in 0..200 {
            let comp = Computation::new(CompId(i), format!("comp{}", i))
                .parm(CompParm::input("input").bound_to(TsKey(i % 50)));
            materializer.materialize(&comp).unwrap();
        }
        let keys: Vec<TsKey> = (0..10).map(TsKey).collect();

        b.iter(|| {
            materializer
                .computations_affected_by(black_box(&keys), None)
                .unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_cache, bench_materialize);
criterion_main!(benches);
