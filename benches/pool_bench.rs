use criterion::{black_box, criterion_group, criterion_main, Criterion};

use apool::index::{FileIndex, IndexEntry};
use apool::testutil::{int_oid, make_random_string, make_uncompressible_bytes};
use apool::{chunk, Kind};

fn bench_compression(c: &mut Criterion) {
    let text = make_random_string(1024 * 1024, 1).into_bytes();
    let noise = make_uncompressible_bytes(1024 * 1024, 1);
    c.bench_function("deflate_1mb_text", |b| {
        b.iter(|| chunk::try_compress(black_box(&text)).unwrap())
    });
    c.bench_function("deflate_1mb_noise", |b| {
        b.iter(|| chunk::try_compress(black_box(&noise)).unwrap())
    });
}

fn bench_index_find(c: &mut Criterion) {
    let kind = Kind::new("blob").unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    let name = dir.path().join("bench.idx");

    let mut index = FileIndex::new();
    for i in 0..100_000u32 {
        index.insert(int_oid(i), IndexEntry { offset: i, kind });
    }
    index.save(&name, 100_000).unwrap();
    index.load(&name, 100_000).unwrap();

    c.bench_function("index_find_hit", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = (i + 1) % 100_000;
            index.find(black_box(&int_oid(i))).unwrap()
        })
    });
    c.bench_function("index_find_miss", |b| {
        let mut probe = int_oid(7);
        probe.inc();
        b.iter(|| index.find(black_box(&probe)))
    });
}

criterion_group!(benches, bench_compression, bench_index_find);
criterion_main!(benches);
