//! Benchmarks for the cancel drain and the lazy error check.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use cxtree::{Context, ManualHost};
use std::rc::Rc;

fn bench_cancel_drain(c: &mut Criterion) {
    c.bench_function("cancel_drain_64_listeners", |b| {
        b.iter_batched(
            || {
                let host = Rc::new(ManualHost::new());
                let root = Context::background(host.clone());
                let (ctx, cancel) = root.with_cancel();
                for _ in 0..64 {
                    let _ = ctx.on_did_cancel(|_| {});
                }
                Context::release_root(&host);
                (ctx, cancel)
            },
            |(_ctx, cancel)| cancel.cancel(),
            BatchSize::SmallInput,
        );
    });
}

fn bench_error_walk(c: &mut Criterion) {
    c.bench_function("error_walk_depth_32", |b| {
        let host = Rc::new(ManualHost::new());
        let root = Context::background(host.clone());
        let mut node = root;
        let mut handles = Vec::new();
        for _ in 0..32 {
            let (child, cancel) = node.with_cancel();
            handles.push(cancel);
            node = child;
        }
        Context::release_root(&host);

        b.iter(|| {
            assert!(node.error().is_none());
        });
    });
}

criterion_group!(benches, bench_cancel_drain, bench_error_walk);
criterion_main!(benches);
