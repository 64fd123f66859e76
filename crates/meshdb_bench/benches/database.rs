//! Document store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use meshdb_bench::{generate_people, populated};
use meshdb_core::Database;
use meshdb_testkit::{people_collection, Person};
use rand::Rng;

/// Benchmark single-model inserts, each its own transaction.
fn bench_single_insert(c: &mut Criterion) {
    c.bench_function("single_insert", |b| {
        let db = Database::open_in_memory().unwrap();
        let (people, _) = people_collection(&db);
        let mut next = 0u64;

        b.iter(|| {
            next += 1;
            let person = Person::new(&format!("p{next}"), (next % 100) as u32);
            black_box(people.insert(black_box(&person)).unwrap());
        });
    });
}

/// Benchmark inserts batched into one transaction.
fn bench_batch_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_insert");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let batch = generate_people(batch_size);
                b.iter_batched(
                    || {
                        let db = Database::open_in_memory().unwrap();
                        let (people, _) = people_collection(&db);
                        (db, people)
                    },
                    |(_db, people)| {
                        let mut txn = people.open_transaction().unwrap();
                        for person in &batch {
                            txn.insert(black_box(person)).unwrap();
                        }
                        txn.commit().unwrap();
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

/// Benchmark point reads from a populated collection.
fn bench_find_by_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_by_id");

    for count in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let (_db, people, _) = populated(count);
            let mut rng = rand::thread_rng();

            b.iter(|| {
                let id = format!("person-{:08}", rng.gen_range(0..count));
                black_box(people.find_by_id(black_box(id.as_bytes())).unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark update, which rewrites the model and its index entries.
fn bench_update(c: &mut Criterion) {
    c.bench_function("update", |b| {
        let (_db, people, _) = populated(1000);
        let mut rng = rand::thread_rng();

        b.iter(|| {
            let person = Person::new(
                &format!("person-{:08}", rng.gen_range(0..1000)),
                rng.gen_range(0..100),
            );
            black_box(people.update(&person).unwrap());
        });
    });
}

/// Benchmark index queries of growing selectivity.
fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let (_db, people, age) = populated(10000);

    group.bench_function("value", |b| {
        b.iter(|| {
            let found = people.new_query(age.value_filter(b"42")).run().unwrap();
            black_box(found);
        });
    });
    group.bench_function("range", |b| {
        b.iter(|| {
            let found = people
                .new_query(age.range_filter(b"40", b"50"))
                .max(100)
                .run()
                .unwrap();
            black_box(found);
        });
    });
    group.bench_function("count_all", |b| {
        b.iter(|| black_box(people.new_query(people.all_filter()).count().unwrap()));
    });
    group.bench_function("count_key", |b| {
        b.iter(|| black_box(people.count().unwrap()));
    });
    group.finish();
}

/// Benchmark snapshot creation and reads through it under concurrent writes.
fn bench_snapshot(c: &mut Criterion) {
    let (_db, people, _) = populated(1000);

    c.bench_function("snapshot_open_release", |b| {
        b.iter(|| people.snapshot().unwrap().release());
    });
    c.bench_function("snapshot_find_all", |b| {
        let snapshot = people.snapshot().unwrap();
        b.iter(|| black_box(snapshot.find_all().unwrap()));
    });
}

/// Benchmark the integrity checker.
fn bench_integrity(c: &mut Criterion) {
    let (db, _, _) = populated(1000);
    c.bench_function("check_integrity", |b| {
        b.iter(|| db.check_integrity().unwrap());
    });
}

criterion_group!(
    benches,
    bench_single_insert,
    bench_batch_insert,
    bench_find_by_id,
    bench_update,
    bench_query,
    bench_snapshot,
    bench_integrity,
);

criterion_main!(benches);
