//! Benchmarks for resolution, compilation and encoding.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use twinflow::catalog::{CandidateIndex, InMemoryCatalog, TaxonomyReasoner};
use twinflow::config::ResolverConfig;
use twinflow::coverage::Coverage;
use twinflow::dataflow::{DataflowCompiler, DataflowEncoder};
use twinflow::id::AtomicIdAllocator;
use twinflow::model::{Dependency, Model};
use twinflow::observable::Observable;
use twinflow::resolution::ResolutionBuilder;
use twinflow::scale::{Dimension, Scale};
use twinflow::scope::ContextScope;

fn obs(def: &str) -> Observable {
    def.parse().unwrap()
}

fn region() -> Scale {
    Scale::space(0.0, 100.0, 0.0, 100.0).unwrap()
}

/// A chain `t:L0 <- t:L1 <- ... <- t:L{depth}`, each level covered by
/// `tiles` models over strips of the region.
fn layered_index(depth: usize, tiles: usize) -> CandidateIndex {
    let catalog = InMemoryCatalog::new();
    let strips = region().split(Dimension::X, tiles).unwrap();
    for level in 0..=depth {
        for (i, strip) in strips.iter().enumerate() {
            let mut model = Model::new(format!("im.l{level}.tile{i}"), obs(&format!("t:L{level}")))
                .covering(strip.clone());
            if level < depth {
                model = model.depends_on(Dependency::new(obs(&format!("t:L{}", level + 1))));
            }
            catalog.insert(model).unwrap();
        }
    }
    CandidateIndex::new(Arc::new(catalog), Arc::new(TaxonomyReasoner::new()))
}

fn bench_coverage_merge(c: &mut Criterion) {
    let strips_x = region().split(Dimension::X, 16).unwrap();
    let strips_y = region().split(Dimension::Y, 16).unwrap();
    let a = Coverage::of(region(), strips_x.iter().step_by(2));
    let b = Coverage::of(region(), strips_y.iter().step_by(2));

    c.bench_function("coverage_merge_16x16", |bench| {
        bench.iter(|| black_box(a.merge(&b)))
    });
}

fn bench_resolve(c: &mut Criterion) {
    let index = layered_index(4, 4);
    let config = ResolverConfig::default();
    let scope = ContextScope::new("bench", region());
    let target = obs("t:L0");

    c.bench_function("resolve_depth4_tiles4", |bench| {
        bench.iter(|| {
            black_box(
                ResolutionBuilder::new(&index, &config)
                    .resolve(&target, &scope)
                    .unwrap(),
            )
        })
    });
}

fn bench_compile_and_encode(c: &mut Criterion) {
    let index = layered_index(4, 4);
    let config = ResolverConfig::default();
    let scope = ContextScope::new("bench", region());
    let resolution = ResolutionBuilder::new(&index, &config)
        .resolve(&obs("t:L0"), &scope)
        .unwrap();
    let allocator = AtomicIdAllocator::new();
    let encoder = DataflowEncoder::default();

    c.bench_function("compile_depth4_tiles4", |bench| {
        bench.iter(|| black_box(DataflowCompiler::new(&allocator).compile(&resolution).unwrap()))
    });

    let dataflow = DataflowCompiler::new(&allocator).compile(&resolution).unwrap();
    c.bench_function("encode_depth4_tiles4", |bench| {
        bench.iter(|| black_box(encoder.encode(&dataflow, &scope)))
    });
}

criterion_group!(benches, bench_coverage_merge, bench_resolve, bench_compile_and_encode);
criterion_main!(benches);
