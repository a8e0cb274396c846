//! Performance benchmarks for state normalization and materialization
//!
//! Measures how enumeration scales with the number of values per field and
//! with chains of connected nodes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use statespace::splitter::rpn::splitter_to_rpn;
use statespace::splitter::{Inputs, Splitter};
use statespace::state::State;
use std::hint::black_box;
use std::sync::Arc;

fn values(n: usize) -> Value {
    Value::Array((0..n).map(|i| json!(i)).collect())
}

/// Benchmark parsing and compiling splitters of growing width
fn bench_normalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalization");

    for width in &[2, 8, 32] {
        let fields: Vec<String> = (0..*width).map(|i| format!("f{}", i)).collect();
        let text = format!("[{}]", fields.join(", "));

        group.bench_with_input(BenchmarkId::new("parse_and_compile", width), &text, |b, text| {
            b.iter(|| {
                let splitter = Splitter::parse(black_box(text)).unwrap();
                splitter_to_rpn(&splitter).unwrap()
            });
        });

        group.bench_with_input(BenchmarkId::new("build_state", width), &text, |b, text| {
            let splitter = Splitter::parse(text).unwrap();
            b.iter(|| {
                State::builder("NA")
                    .splitter(black_box(splitter.clone()))
                    .combiner(["f0"])
                    .build()
                    .unwrap()
            });
        });
    }

    group.finish();
}

/// Benchmark enumerating an outer product of three fields
fn bench_outer_product(c: &mut Criterion) {
    let mut group = c.benchmark_group("outer_product");
    let st = State::builder("NA")
        .splitter(Splitter::parse("[a, (b, c), d]").unwrap())
        .combiner(["d"])
        .build()
        .unwrap();

    for size in &[4, 16, 64] {
        let inputs: Inputs = ["a", "b", "c", "d"]
            .iter()
            .map(|f| (format!("NA.{}", f), values(*size)))
            .collect();

        group.bench_with_input(BenchmarkId::new("materialize", size), &inputs, |b, inputs| {
            b.iter(|| st.materialize(black_box(inputs)).unwrap());
        });

        let space = st.materialize(&inputs).unwrap();
        group.bench_with_input(BenchmarkId::new("states_val_final", size), &space, |b, space| {
            b.iter(|| black_box(space).states_val_final());
        });
    }

    group.finish();
}

/// Benchmark materializing a chain of nodes, each adding one field
fn bench_node_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_chain");

    for depth in &[2usize, 4, 6] {
        let mut inputs = Inputs::new();
        let mut last: Option<Arc<State>> = None;
        for i in 0..*depth {
            let name = format!("N{}", i);
            inputs.insert(format!("{}.x", name), values(3));
            let mut builder = State::builder(&name).splitter(Splitter::field("x"));
            if let Some(upstream) = last.take() {
                builder = builder.upstream(upstream, "in");
            }
            last = Some(Arc::new(builder.build().unwrap()));
        }
        let Some(tail) = last else { continue };

        group.bench_with_input(BenchmarkId::new("materialize", depth), &inputs, |b, inputs| {
            b.iter(|| tail.materialize(black_box(inputs)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_normalization,
    bench_outer_product,
    bench_node_chain
);
criterion_main!(benches);
