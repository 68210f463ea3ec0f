//! Propagation benchmarks: a long chain of increments and a wide fan-out.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use chrono_core::chrono::{Atom, Mutation};
use chrono_core::graph::{ChronoGraph, NodeId};

fn increment() -> impl Fn(&[serde_json::Value]) -> chrono_core::chrono::CalcResult + Send + Sync {
    |args| Ok(json!(args[0].as_i64().unwrap_or(0) + 1).into())
}

/// `head -> n1 -> n2 -> ... -> n{len}`
fn chain(len: usize) -> (ChronoGraph, NodeId) {
    let mut graph = ChronoGraph::new();
    let root = graph.root();
    let head = graph.create_atom(Atom::observable());
    graph.add_node(root, head).unwrap();

    let mut previous = head;
    for _ in 0..len {
        let next = graph.create_atom(Atom::observable());
        let calc = graph
            .create_mutation(Mutation::positional([previous], [next], increment()))
            .unwrap();
        graph.add_nodes(root, &[next, calc]).unwrap();
        previous = next;
    }
    graph.propagate().unwrap();
    (graph, head)
}

/// `head` feeding `width` independent calculations.
fn fan_out(width: usize) -> (ChronoGraph, NodeId) {
    let mut graph = ChronoGraph::new();
    let root = graph.root();
    let head = graph.create_atom(Atom::observable());
    graph.add_node(root, head).unwrap();

    for _ in 0..width {
        let out = graph.create_atom(Atom::observable());
        let calc = graph
            .create_mutation(Mutation::positional([head], [out], increment()))
            .unwrap();
        graph.add_nodes(root, &[out, calc]).unwrap();
    }
    graph.propagate().unwrap();
    (graph, head)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for len in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            let (mut graph, head) = chain(len);
            let mut value = 0;
            b.iter(|| {
                value += 1;
                graph.write(head, json!(value)).unwrap();
                black_box(graph.propagate().unwrap());
            });
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for width in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let (mut graph, head) = fan_out(width);
            let mut value = 0;
            b.iter(|| {
                value += 1;
                graph.write(head, json!(value)).unwrap();
                black_box(graph.propagate().unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chain, bench_fan_out);
criterion_main!(benches);
