//! Benchmarks for inbound frame splitting.
//!
//! Measures `for_each_frame` over one completed read transfer at typical
//! packet sizes, with the modem status kept and stripped.
//!
//! Run with: cargo bench -p bulkstream-core --bench frame_split

use bulkstream_core::frame::{for_each_frame, ModemStatus};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// A transfer of `packets` full packets, each with a status prefix.
fn transfer(packet_size: usize, packets: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(packet_size * packets);
    for p in 0..packets {
        data.extend_from_slice(&[0x11, 0x60]);
        data.extend((0..packet_size - 2).map(|i| (p + i) as u8));
    }
    data
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_split");

    for &(packet_size, packets) in &[(64usize, 8usize), (512, 8), (512, 64)] {
        let data = transfer(packet_size, packets);
        group.throughput(Throughput::Bytes(data.len() as u64));

        for include_status in [false, true] {
            let id = format!("{}x{}/status={}", packet_size, packets, include_status);
            group.bench_with_input(BenchmarkId::from_parameter(id), &data, |b, data| {
                b.iter(|| {
                    let mut sum = 0usize;
                    let payload = for_each_frame(black_box(data), packet_size, include_status, |frame| {
                        sum = sum.wrapping_add(frame.len());
                    });
                    black_box((payload, sum))
                })
            });
        }
    }
    group.finish();
}

fn bench_modem_status(c: &mut Criterion) {
    let frame = [0x31u8, 0x60, 1, 2, 3];
    c.bench_function("modem_status_decode", |b| {
        b.iter(|| {
            let status = ModemStatus::from_frame(black_box(&frame));
            black_box(status.map(|s| (s.cts(), s.dsr(), s.ri())))
        })
    });
}

criterion_group!(benches, bench_split, bench_modem_status);
criterion_main!(benches);
