//! Capture pipeline benchmarks
//!
//! - SPSC ring push/pop
//! - One full buffer cycle through the three queues
//! - Sample copy into a pending buffer
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::sync::Arc;

use lan_mic_relay::{
    audio::{kickstart, ring, BufferIntake},
    error::DriverError,
    session::SessionCounters,
};

struct AcceptAll;

impl BufferIntake for AcceptAll {
    fn enqueue(&mut self, _index: usize) -> Result<(), DriverError> {
        Ok(())
    }
}

fn bench_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Elements(1));

    group.bench_function("push_pop", |b| {
        let (mut tx, mut rx) = ring::<usize>(4);
        b.iter(|| {
            let _ = tx.push(black_box(7));
            black_box(rx.pop())
        });
    });

    group.finish();
}

fn bench_buffer_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Bytes(640));

    group.bench_function("complete_send_release", |b| {
        let counters = Arc::new(SessionCounters::default());
        let (mut capture, mut network) = kickstart(4, 640, 3, AcceptAll, counters).unwrap();
        b.iter(|| {
            capture.complete();
            let handle = network.try_take_ready().unwrap();
            black_box(network.bytes(&handle)[0]);
            network.release(handle);
        });
    });

    group.bench_function("write_samples_320", |b| {
        let counters = Arc::new(SessionCounters::default());
        b.iter_batched(
            || kickstart(4, 640, 3, AcceptAll, counters.clone()).unwrap(),
            |(mut capture, _network)| {
                black_box(capture.write_samples((0..320).map(|i| i as i16)));
                capture
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_ring, bench_buffer_cycle);
criterion_main!(benches);
