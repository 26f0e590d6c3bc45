//! Criterion micro-benchmarks for the dispatch path.
//!
//! These benchmarks measure the per-call overhead that does not involve
//! the network:
//! - Argument marshaling for variadic call adapters
//! - Registry lookup under churn
//! - View evolution (join/leave snapshots)
//!
//! Run with: `cargo bench --bench dispatch_bench`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

use conclave::command::{CallSpec, CommandRegistry, FnCommand, RemoteCommand};
use conclave::types::{Member, MembershipView, NodeId};

fn bench_marshal(c: &mut Criterion) {
    let mut group = c.benchmark_group("marshal");
    for trailing in [0usize, 2, 8, 32] {
        let spec = CallSpec::variadic(1);
        let mut args = vec![json!("separator")];
        args.extend((0..trailing).map(|i| json!(i)));
        group.bench_with_input(
            BenchmarkId::from_parameter(trailing),
            &args,
            |b, args: &Vec<Value>| {
                b.iter(|| spec.marshal(black_box(args)).unwrap());
            },
        );
    }
    group.finish();
}

fn bench_registry_lookup(c: &mut Criterion) {
    let registry = CommandRegistry::new();
    for i in 0..256 {
        registry.register(Arc::new(FnCommand::new(format!("cmd-{i}"), |_args| {
            Ok(Value::Null)
        })));
    }

    c.bench_function("registry_lookup", |b| {
        b.iter(|| {
            let cmd = registry.get(black_box("cmd-127")).unwrap();
            black_box(cmd.id().len())
        });
    });
}

fn bench_view_evolution(c: &mut Criterion) {
    let members: Vec<Member> = (1..=32u64)
        .map(|i| {
            Member::new(
                NodeId(i),
                format!("127.0.0.1:{}", 7000 + i).parse().unwrap(),
            )
        })
        .collect();

    c.bench_function("view_join_32", |b| {
        b.iter(|| {
            let mut view = MembershipView::bootstrap(members[0]);
            for member in &members[1..] {
                view = view.with_member(*member);
            }
            black_box(view.len())
        });
    });

    let mut full = MembershipView::bootstrap(members[0]);
    for member in &members[1..] {
        full = full.with_member(*member);
    }
    c.bench_function("view_leave", |b| {
        b.iter(|| black_box(full.without_member(NodeId(16))).len());
    });
}

criterion_group!(
    benches,
    bench_marshal,
    bench_registry_lookup,
    bench_view_evolution
);
criterion_main!(benches);
