//! Benchmarks for registry loading and path resolution.

use artifactflow::contracts::{rigging_definition, JobRoot, StageContractRegistry};
use artifactflow::core::{ArtifactRole, StageId};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn registry_benchmark(c: &mut Criterion) {
    let definition = rigging_definition().expect("rigging definition parses");

    c.bench_function("load_rigging_registry", |b| {
        b.iter(|| StageContractRegistry::load(black_box(definition.clone())).expect("registry loads"));
    });
}

fn resolver_benchmark(c: &mut Criterion) {
    let registry = StageContractRegistry::rigging().expect("registry loads");
    let root = JobRoot::new("/var/lib/artifactflow/jobs/bench").expect("absolute root");
    let stage = StageId::new("structure_merge").expect("valid stage");
    let role = ArtifactRole::new("skinning-weights").expect("valid role");

    c.bench_function("resolve_input_path", |b| {
        let resolver = registry.resolver();
        b.iter(|| resolver.resolve(black_box(&root), black_box(&stage), black_box(&role)));
    });

    c.bench_function("resolve_all_roles", |b| {
        let resolver = registry.resolver();
        b.iter(|| {
            registry
                .role_specs()
                .filter_map(|spec| resolver.role_path(&root, &spec.role))
                .count()
        });
    });
}

criterion_group!(benches, registry_benchmark, resolver_benchmark);
criterion_main!(benches);
