use anyhow::Result;

use blockdex::btree::Blockdex;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use tempfile::TempDir;

const ENTRIES: u64 = 10_000;

// Utility function for creating an index to use with benches
fn create_index(dir: &TempDir) -> Result<std::path::PathBuf> {
    let path = dir.path().join("bench.idx");
    let mut db = Blockdex::try_new(&path)?;

    let mut rng = rand::thread_rng();
    for value in 0..ENTRIES {
        db.insert(rng.gen_range(0..ENTRIES * 10), value)?;
    }
    db.close()?;

    Ok(path)
}

fn blockdex_search(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = create_index(&dir).expect("index created");

    let mut group = c.benchmark_group("search");
    for capacity in [1, 3, 16, 64, 256].iter() {
        // Open again for each capacity, so we start with an empty cache
        let mut db = Blockdex::try_open_with_capacity(&path, *capacity).expect("index opened");
        group.bench_with_input(
            BenchmarkId::new("blockdex search", capacity),
            capacity,
            |b, _capacity| {
                let mut rng = rand::thread_rng();
                b.iter(|| {
                    let key = rng.gen_range(0..ENTRIES * 10);
                    let _ = db.search(key);
                })
            },
        );
    }
}

fn blockdex_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for capacity in [1, 3, 16, 64, 256].iter() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = create_index(&dir).expect("index created");
        let mut db = Blockdex::try_open_with_capacity(&path, *capacity).expect("index opened");
        group.bench_with_input(
            BenchmarkId::new("blockdex insert", capacity),
            capacity,
            |b, _capacity| {
                let mut rng = rand::thread_rng();
                b.iter(|| {
                    let key = rng.gen_range(0..ENTRIES * 10);
                    let _ = db.insert(key, key);
                })
            },
        );
    }
}

fn blockdex_export(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = create_index(&dir).expect("index created");
    let mut db = Blockdex::try_open(&path).expect("index opened");

    c.bench_function("blockdex export", |b| {
        b.iter(|| {
            let _ = db.export(std::io::sink());
        })
    });
}

criterion_group!(benches, blockdex_search, blockdex_insert, blockdex_export);
criterion_main!(benches);
