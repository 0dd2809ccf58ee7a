use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use examdb::{BPlusTree, StoreOptions, TrieIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const ORDERS: [usize; 3] = [8, 64, 512];

// Scores on the 0..1000 scale with two decimals, like real exam data
fn generate_scores(size: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..size)
        .map(|_| (rng.gen_range(0..100_000) as f32) / 100.0)
        .collect()
}

fn benchmark_btree_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_insert_random");
    let scores = generate_scores(10_000);

    for order in ORDERS {
        group.throughput(Throughput::Elements(scores.len() as u64));
        group.bench_with_input(BenchmarkId::new("order", order), &order, |b, &order| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let mut tree = BPlusTree::open(temp_dir.path(), "bench", order, StoreOptions::default()).unwrap();
                for (id, &score) in scores.iter().enumerate() {
                    tree.insert(black_box(score), id as u32).unwrap();
                }
            });
        });
    }

    group.finish();
}

fn benchmark_btree_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_scan");
    let scores = generate_scores(10_000);

    for order in ORDERS {
        let temp_dir = TempDir::new().unwrap();
        let mut tree = BPlusTree::open(temp_dir.path(), "bench", order, StoreOptions::default()).unwrap();
        for (id, &score) in scores.iter().enumerate() {
            tree.insert(score, id as u32).unwrap();
        }

        group.throughput(Throughput::Elements(scores.len() as u64));
        group.bench_function(BenchmarkId::new("forward", order), |b| {
            b.iter(|| black_box(tree.scan_forward().count()));
        });
        group.bench_function(BenchmarkId::new("backward", order), |b| {
            b.iter(|| black_box(tree.scan_backward().count()));
        });
        group.bench_function(BenchmarkId::new("range", order), |b| {
            b.iter(|| black_box(tree.range(400.0, 600.0).unwrap().len()));
        });
    }

    group.finish();
}

fn benchmark_trie_lookup(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let mut trie = TrieIndex::open(temp_dir.path().join("trie.dat"), StoreOptions::default()).unwrap();
    let keys: Vec<String> = (0..5_000u64).map(|i| format!("2023{:08}", i * 37)).collect();
    for (id, key) in keys.iter().enumerate() {
        trie.insert(key, id as u32).unwrap();
    }

    c.bench_function("trie_lookup_5000", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(trie.lookup(key).unwrap());
            }
        });
    });
}

criterion_group!(benches, benchmark_btree_insert, benchmark_btree_scan, benchmark_trie_lookup);
criterion_main!(benches);
