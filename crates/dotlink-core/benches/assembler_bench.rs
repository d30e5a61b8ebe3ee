//! Criterion benchmarks for frame assembly.
//!
//! Measures how quickly a burst of inbound bytes is split into frames,
//! with and without line noise that forces resynchronisation.
//!
//! Run with:
//! ```bash
//! cargo bench --package dotlink-core --bench assembler_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dotlink_core::protocol::humanware::{HumanWareVerifier, ESC};
use dotlink_core::protocol::tsi::TsiVerifier;
use dotlink_core::FrameAssembler;

// ── Stream fixtures ───────────────────────────────────────────────────────────

fn humanware_key_burst(frames: usize) -> Vec<u8> {
    (0..frames)
        .flat_map(|i| [ESC, if i % 2 == 0 { 0x05 } else { 0x06 }, 0x01, (i % 0x14) as u8])
        .collect()
}

fn tsi_noisy_stream(frames: usize) -> Vec<u8> {
    let mut stream = Vec::new();
    for i in 0..frames {
        stream.extend_from_slice(&[0x61, 0xE0 | (i as u8 & 0x1F)]);
        if i % 4 == 0 {
            stream.push(0x13);
        }
    }
    stream
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_humanware_clean(c: &mut Criterion) {
    let stream = humanware_key_burst(256);
    c.bench_function("assemble_humanware_256_frames", |b| {
        b.iter(|| {
            let mut assembler = FrameAssembler::new(HumanWareVerifier::default());
            assembler.feed(black_box(&stream));
            let mut count = 0;
            while let Some(result) = assembler.next_frame() {
                count += usize::from(result.is_ok());
            }
            black_box(count)
        })
    });
}

fn bench_tsi_with_noise(c: &mut Criterion) {
    let stream = tsi_noisy_stream(256);
    c.bench_function("assemble_tsi_256_frames_with_noise", |b| {
        b.iter(|| {
            let mut assembler = FrameAssembler::new(TsiVerifier::default());
            assembler.feed(black_box(&stream));
            let mut count = 0;
            while let Some(result) = assembler.next_frame() {
                count += usize::from(result.is_ok());
            }
            black_box(count)
        })
    });
}

criterion_group!(benches, bench_humanware_clean, bench_tsi_with_noise);
criterion_main!(benches);
