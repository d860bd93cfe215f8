//! Sortedness-sweep benchmark.
//!
//! Runs every tree variant over streams of decreasing sortedness and
//! writes per-operation timings plus tree statistics to
//! `btree_benchmark.csv`. A missing key during verification is a failed
//! invariant and exits non-zero.

use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use lasdb_common::types::Field;
use lasdb_common::types::FieldType;
use lasdb_common::{LasError, Result, StorageConfig};
use lasdb_storage::{
    AppendLeaf, Database, LasTree, OptimizedTree, Schema, SimpleTree, SortedLeaf, Tuple,
};

/// Input streams: fraction of keys already in ascending order.
const SORTEDNESS_LEVELS: [f64; 5] = [1.0, 0.95, 0.8, 0.5, 0.2];

/// Fraction of keys sampled for the point-lookup phase.
const READ_RATIO: f64 = 0.5;

/// Random range queries per run, each spanning up to 100 keys.
const NUM_RANGES: usize = 100;

const RNG_SEED: u64 = 42;

#[derive(Parser)]
#[command(name = "lasdb-bench", about = "Benchmark lasdb tree variants")]
struct Args {
    /// Number of keys to insert per tree.
    #[arg(long, default_value_t = 100_000)]
    size: usize,

    /// Directory for index files (recreated on each run).
    #[arg(long, default_value = "./bench-data")]
    data_dir: PathBuf,

    /// Output CSV path.
    #[arg(long, default_value = "btree_benchmark.csv")]
    out: PathBuf,
}

struct ResultRow {
    tree_name: &'static str,
    sortedness: f64,
    read_ratio: f64,
    insert_time_ms: f64,
    search_time_ms: f64,
    range_query_time_ms: f64,
    mixed_workload_time_ms: f64,
    leaf_count: usize,
    leaf_utilization: f64,
    fast_path_hits: u64,
    sorted_leaf_search: u64,
}

/// Uniform driver surface over the tree variants.
trait BenchTree {
    fn insert(&self, tuple: &Tuple) -> Result<()>;
    fn get(&self, key: &Field) -> Result<Option<Tuple>>;
    fn range(&self, lo: &Field, hi: &Field) -> Result<Vec<Tuple>>;
    fn leaf_stats(&self) -> Result<(usize, f64)>;
    fn fast_path_hits(&self) -> u64;
    fn sorted_leaf_search(&self) -> u64;
}

macro_rules! impl_bench_tree {
    ($ty:ty) => {
        impl BenchTree for $ty {
            fn insert(&self, tuple: &Tuple) -> Result<()> {
                <$ty>::insert(self, tuple)
            }
            fn get(&self, key: &Field) -> Result<Option<Tuple>> {
                <$ty>::get(self, key)
            }
            fn range(&self, lo: &Field, hi: &Field) -> Result<Vec<Tuple>> {
                <$ty>::range(self, lo, hi)
            }
            fn leaf_stats(&self) -> Result<(usize, f64)> {
                <$ty>::leaf_stats(self)
            }
            fn fast_path_hits(&self) -> u64 {
                <$ty>::fast_path_hits(self)
            }
            fn sorted_leaf_search(&self) -> u64 {
                <$ty>::sorted_leaf_search(self)
            }
        }
    };
}

impl_bench_tree!(OptimizedTree<i32, SortedLeaf>);
impl_bench_tree!(OptimizedTree<i32, AppendLeaf>);
impl_bench_tree!(LasTree<i32>);

impl BenchTree for SimpleTree<i32> {
    fn insert(&self, tuple: &Tuple) -> Result<()> {
        SimpleTree::insert(self, tuple)
    }
    fn get(&self, key: &Field) -> Result<Option<Tuple>> {
        SimpleTree::get(self, key)
    }
    fn range(&self, lo: &Field, hi: &Field) -> Result<Vec<Tuple>> {
        SimpleTree::range(self, lo, hi)
    }
    fn leaf_stats(&self) -> Result<(usize, f64)> {
        SimpleTree::leaf_stats(self)
    }
    fn fast_path_hits(&self) -> u64 {
        0 // the baseline never short-circuits the descent
    }
    fn sorted_leaf_search(&self) -> u64 {
        SimpleTree::sorted_leaf_search(self)
    }
}

fn kv_schema() -> Result<Schema> {
    Schema::new(vec![FieldType::Int, FieldType::Char], vec!["key", "val"])
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("benchmark failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    if args.data_dir.exists() {
        std::fs::remove_dir_all(&args.data_dir)?;
    }
    let db = Arc::new(Database::new(StorageConfig {
        data_dir: args.data_dir.clone(),
        ..Default::default()
    })?);

    let schema = kv_schema()?;
    let mut results = Vec::new();

    for (level_idx, &sortedness) in SORTEDNESS_LEVELS.iter().enumerate() {
        println!("benchmarking sortedness = {}", sortedness);
        let keys = generate_keys(args.size, sortedness);

        {
            let name = format!("simple-{}.idx", level_idx);
            let mix_name = format!("simple-mix-{}.idx", level_idx);
            let tree = SimpleTree::<i32>::new(db.clone(), &name, schema.clone(), 0)?;
            tree.init()?;
            let mix = SimpleTree::<i32>::new(db.clone(), &mix_name, schema.clone(), 0)?;
            mix.init()?;
            results.push(bench_variant(
                "SimpleBTree",
                sortedness,
                &tree,
                &mix,
                &keys,
            )?);
        }

        {
            let name = format!("opt-{}.idx", level_idx);
            let mix_name = format!("opt-mix-{}.idx", level_idx);
            let tree = OptimizedTree::<i32, SortedLeaf>::new(db.clone(), &name, schema.clone(), 0)?;
            tree.init()?;
            let mix =
                OptimizedTree::<i32, SortedLeaf>::new(db.clone(), &mix_name, schema.clone(), 0)?;
            mix.init()?;
            results.push(bench_variant(
                "OptimizedBTree",
                sortedness,
                &tree,
                &mix,
                &keys,
            )?);
        }

        {
            let name = format!("log-{}.idx", level_idx);
            let mix_name = format!("log-mix-{}.idx", level_idx);
            let tree = OptimizedTree::<i32, AppendLeaf>::new(db.clone(), &name, schema.clone(), 0)?;
            tree.init()?;
            let mix =
                OptimizedTree::<i32, AppendLeaf>::new(db.clone(), &mix_name, schema.clone(), 0)?;
            mix.init()?;
            results.push(bench_variant(
                "LoggedBTree",
                sortedness,
                &tree,
                &mix,
                &keys,
            )?);
        }

        {
            let name = format!("las-{}.idx", level_idx);
            let mix_name = format!("las-mix-{}.idx", level_idx);
            let mut tree = LasTree::<i32>::new(db.clone(), &name, schema.clone(), 0)?;
            tree.init()?;
            let mut mix = LasTree::<i32>::new(db.clone(), &mix_name, schema.clone(), 0)?;
            mix.init()?;
            results.push(bench_variant("LasTree", sortedness, &tree, &mix, &keys)?);
        }
    }

    write_csv(&args.out, &results)?;
    println!("CSV written to {}", args.out.display());
    Ok(())
}

/// Sequential keys with the first `(1 - sortedness) * n` positions
/// shuffled by a seeded RNG.
fn generate_keys(n: usize, sortedness: f64) -> Vec<i32> {
    let mut keys: Vec<i32> = (0..n as i32).collect();
    if sortedness < 1.0 {
        let shuffle_count = ((n as f64) * (1.0 - sortedness)) as usize;
        let mut rng = StdRng::seed_from_u64(RNG_SEED);
        keys[..shuffle_count].shuffle(&mut rng);
    }
    keys
}

fn tuple_for(k: i32) -> Tuple {
    Tuple::new(vec![Field::Int(k), Field::Char(format!("val-{}", k))])
}

fn bench_variant<T: BenchTree>(
    tree_name: &'static str,
    sortedness: f64,
    tree: &T,
    mix_tree: &T,
    keys: &[i32],
) -> Result<ResultRow> {
    let n = keys.len();

    // Insert phase
    let t0 = Instant::now();
    for &k in keys {
        tree.insert(&tuple_for(k))?;
    }
    let insert_time_ms = t0.elapsed().as_secs_f64() * 1e3 / n as f64;

    // Point lookups over a sampled half of the keys
    let mut read_keys = keys.to_vec();
    read_keys.shuffle(&mut StdRng::seed_from_u64(RNG_SEED));
    read_keys.truncate(((n as f64) * READ_RATIO) as usize);

    let t0 = Instant::now();
    for &k in &read_keys {
        if tree.get(&Field::Int(k))?.is_none() {
            return Err(LasError::Internal(format!(
                "{}: key {} missing after insert",
                tree_name, k
            )));
        }
    }
    let search_time_ms = t0.elapsed().as_secs_f64() * 1e3 / read_keys.len().max(1) as f64;

    // Range queries
    let mut rng = StdRng::seed_from_u64(RNG_SEED);
    let ranges: Vec<(i32, i32)> = (0..NUM_RANGES)
        .map(|_| {
            let start = rng.random_range(0..n as i32);
            (start, (start + 100).min(n as i32 - 1))
        })
        .collect();

    let t0 = Instant::now();
    for &(lo, hi) in &ranges {
        let _ = tree.range(&Field::Int(lo), &Field::Int(hi))?;
    }
    let range_query_time_ms = t0.elapsed().as_secs_f64() * 1e3 / NUM_RANGES as f64;

    // Mixed workload (70% inserts of fresh keys, 30% lookups) on a
    // fresh tree
    let mut lookup_keys: Vec<i32> = (0..n as i32).collect();
    lookup_keys.shuffle(&mut StdRng::seed_from_u64(RNG_SEED));
    lookup_keys.truncate(((n as f64) * 0.3) as usize);

    let mut insert_cursor = n as i32;
    let mut lookup_cursor = 0usize;
    let t0 = Instant::now();
    for i in 0..n {
        if i % 10 < 7 {
            mix_tree.insert(&tuple_for(insert_cursor))?;
            insert_cursor += 1;
        } else if lookup_cursor < lookup_keys.len() {
            let _ = mix_tree.get(&Field::Int(lookup_keys[lookup_cursor]))?;
            lookup_cursor += 1;
        }
    }
    let mixed_workload_time_ms = t0.elapsed().as_secs_f64() * 1e3 / n as f64;

    let (leaf_count, leaf_utilization) = tree.leaf_stats()?;

    Ok(ResultRow {
        tree_name,
        sortedness,
        read_ratio: READ_RATIO,
        insert_time_ms,
        search_time_ms,
        range_query_time_ms,
        mixed_workload_time_ms,
        leaf_count,
        leaf_utilization,
        fast_path_hits: tree.fast_path_hits(),
        sorted_leaf_search: mix_tree.sorted_leaf_search(),
    })
}

fn write_csv(path: &PathBuf, results: &[ResultRow]) -> Result<()> {
    let mut out = std::fs::File::create(path)?;
    writeln!(
        out,
        "TreeType,Sortedness,ReadRatio,InsertTime,PointLookupTime,RangeQueryTime,MixedWorkloadTime,LeafCount,LeafUtilization,FastPathHits,SortedLeafSearch"
    )?;
    for r in results {
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{}",
            r.tree_name,
            r.sortedness,
            r.read_ratio,
            r.insert_time_ms,
            r.search_time_ms,
            r.range_query_time_ms,
            r.mixed_workload_time_ms,
            r.leaf_count,
            r.leaf_utilization,
            r.fast_path_hits,
            r.sorted_leaf_search
        )?;
    }
    Ok(())
}
