use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use nbkit::{ConsoleSink, ExecutionMode, MpRuntime, Order};

const ITEMS: u64 = 512;

fn runtime(mode: ExecutionMode) -> MpRuntime {
    let (sink, _captured) = ConsoleSink::capture();
    MpRuntime::builder().mode(mode).workers(4).sink(sink).build()
}

fn busy_work(x: u64) -> u64 {
    (0..2_000u64).fold(x, |acc, i| acc.wrapping_mul(31).wrapping_add(i))
}

fn bench_apply_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    group.throughput(Throughput::Elements(ITEMS));

    for (name, mode) in [
        ("pooled", ExecutionMode::ForkCapable),
        ("serial", ExecutionMode::SpawnOnly),
    ] {
        let runtime = runtime(mode);
        for order in [Order::Preserve, Order::Completion] {
            let id = BenchmarkId::new(name, format!("{:?}", order));
            group.bench_with_input(id, &order, |b, &order| {
                b.iter(|| {
                    let total: u64 = runtime
                        .apply(busy_work, 0..ITEMS, order)
                        .filter_map(Result::ok)
                        .fold(0, u64::wrapping_add);
                    black_box(total);
                });
            });
        }
    }
    group.finish();
}

fn bench_printing_through_forwarder(c: &mut Criterion) {
    let runtime = runtime(ExecutionMode::ForkCapable);
    let printer = runtime.printer();
    c.bench_function("apply_with_chatter", |b| {
        b.iter(|| {
            let printer = printer.clone();
            let count = runtime
                .apply(
                    move |x: u64| {
                        for step in 0..8 {
                            printer.print(format!("item={} step={}", x, step));
                        }
                        x
                    },
                    0..64u64,
                    Order::Completion,
                )
                .count();
            black_box(count);
        });
    });
}

criterion_group!(benches, bench_apply_modes, bench_printing_through_forwarder);
criterion_main!(benches);
