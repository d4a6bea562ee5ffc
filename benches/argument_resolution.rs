//! Argument resolution benchmarks.
//!
//! Measures default chaining and placeholder interpolation cost.

use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use indexmap::IndexMap;

use atomic_runner::catalog::{AtomicTestSpec, ExecutorSpec, InputArgumentSpec};
use atomic_runner::engine::{expand_pairs, parse_pairs, resolve_arguments};

/// A test whose argument `aN` defaults to `#{aN-1}/N`, so resolving the last
/// one walks the whole chain.
fn chained_test(depth: usize) -> AtomicTestSpec {
    let mut input_arguments = IndexMap::new();
    for i in 0..depth {
        let default = if i == 0 {
            "PathToAtomicsFolder/root".to_string()
        } else {
            format!("#{{a{}}}/{}", i - 1, i)
        };
        input_arguments.insert(
            format!("a{}", i),
            InputArgumentSpec {
                description: String::new(),
                kind: "path".to_string(),
                default: Some(default),
            },
        );
    }
    let command = (0..depth).map(|i| format!("echo #{{a{}}}", i)).collect::<Vec<_>>().join("\n");
    AtomicTestSpec {
        name: format!("chain-{}", depth),
        guid: None,
        description: String::new(),
        supported_platforms: vec!["linux".to_string()],
        input_arguments,
        dependency_executor_name: None,
        dependencies: Vec::new(),
        executor: ExecutorSpec {
            name: "sh".to_string(),
            command,
            ..ExecutorSpec::default()
        },
        signatures: Vec::new(),
    }
}

fn bench_resolve_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_default_chain");
    let base = Path::new("/opt/atomics");
    let overrides = IndexMap::new();

    for depth in [4usize, 16, 64] {
        let test = chained_test(depth);
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("depth", depth), &test, |b, t| {
            b.iter(|| resolve_arguments(black_box(t), &overrides, base))
        });
    }

    group.finish();
}

fn bench_interpolate(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpolate_command");
    let base = Path::new("/opt/atomics");

    for depth in [4usize, 16, 64] {
        let test = chained_test(depth);
        let Ok(args) = resolve_arguments(&test, &IndexMap::new(), base) else {
            continue;
        };
        group.throughput(Throughput::Bytes(test.executor.command.len() as u64));
        group.bench_with_input(BenchmarkId::new("placeholders", depth), &test, |b, t| {
            b.iter(|| args.interpolate(black_box(&t.executor.command)))
        });
    }

    group.finish();
}

fn bench_parse_pairs(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_input_pairs");

    for count in [8usize, 64] {
        let raw: Vec<String> = (0..count)
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|chunk| chunk.iter().map(|i| format!("key{}=value={}", i, i)).collect::<Vec<_>>().join(","))
            .collect();
        group.bench_with_input(BenchmarkId::new("pairs", count), &raw, |b, r| {
            b.iter(|| parse_pairs(&expand_pairs(black_box(r))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_resolve_chain, bench_interpolate, bench_parse_pairs);
criterion_main!(benches);
