//! Per-frame hot path benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pfs_dataplane::{FrameProcessor, FrameSource, RxStats};
use pfs_wire::frame::{Op, HEADER_LEN};
use pfs_wire::{MacAddr, PayloadPattern};
use std::sync::Arc;

const DST: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0a]);
const SRC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0b]);

fn bench_tx_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("tx_fill");
    for payload in [64usize, 1400] {
        let mut source = FrameSource::new(DST, SRC, Op::Xor, 0x5a, PayloadPattern::Ramp, payload);
        let mut slot = vec![0u8; 2048 - 32];
        group.throughput(Throughput::Bytes((HEADER_LEN + payload) as u64));
        group.bench_function(format!("payload_{payload}"), |b| {
            b.iter(|| black_box(source.fill(black_box(&mut slot))))
        });
    }
    group.finish();
}

fn bench_rx_process(c: &mut Criterion) {
    let mut source = FrameSource::new(DST, SRC, Op::None, 0, PayloadPattern::Ramp, 1400);
    let mut frame = vec![0u8; HEADER_LEN + 1400];
    source.fill(&mut frame);

    let stats = Arc::new(RxStats::default());
    let mut rx = FrameProcessor::new(Op::Xor.code(), 0x5a, false, stats);

    let mut group = c.benchmark_group("rx_process");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("xor_1400", |b| b.iter(|| rx.process(black_box(&mut frame))));
    group.finish();
}

criterion_group!(benches, bench_tx_fill, bench_rx_process);
criterion_main!(benches);
