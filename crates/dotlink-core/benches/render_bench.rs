//! Criterion benchmarks for the cell renderer diff.
//!
//! Run with:
//! ```bash
//! cargo bench --package dotlink-core --bench render_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dotlink_core::{CellRenderer, RenderError, UpdatePolicy};

fn frames(cells: usize) -> (Vec<u8>, Vec<u8>) {
    let base: Vec<u8> = (0..cells).map(|i| (i % 256) as u8).collect();
    let mut changed = base.clone();
    for i in (0..cells).step_by(7) {
        changed[i] ^= 0xFF;
    }
    (base, changed)
}

fn bench_policies(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_alternating_frames");
    let policies = [
        ("contiguous", UpdatePolicy::ContiguousRange),
        ("merged", UpdatePolicy::MergedSpans { max_gap: 4 }),
        ("whole", UpdatePolicy::WholeFrame),
    ];

    for (name, policy) in policies {
        let (a, b) = frames(80);
        group.bench_with_input(BenchmarkId::from_parameter(name), &policy, |bench, policy| {
            let mut renderer = CellRenderer::new(80, *policy, 12);
            let mut flip = false;
            bench.iter(|| {
                flip = !flip;
                let cells = if flip { &a } else { &b };
                let mut sent = 0usize;
                let outcome = renderer.render::<RenderError, _>(black_box(cells), |_, chunk| {
                    sent += chunk.len();
                    Ok(())
                });
                black_box((outcome, sent))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_policies);
criterion_main!(benches);
