use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sluice::block::{BLOCK_SIZE, STATE_PROCESSED};
use sluice::ring::RingBuffer;
use std::sync::atomic::Ordering;

fn bench_state_scans(c: &mut Criterion) {
    // Ten seconds of audio; the match sits in the final lane, so every
    // preceding lane is scanned.
    let ring = RingBuffer::new(960).unwrap();
    ring.fill_states(0x01);
    ring.state(959).store(STATE_PROCESSED, Ordering::Relaxed);

    c.bench_function("first_match_960_blocks", |b| {
        b.iter(|| black_box(ring.first_index_matching(black_box(STATE_PROCESSED))))
    });
    c.bench_function("first_nonmatch_960_blocks", |b| {
        b.iter(|| black_box(ring.first_index_not_matching(black_box(0x01))))
    });
}

fn bench_slice_copy(c: &mut Criterion) {
    let mut src = RingBuffer::new(96).unwrap();
    let dst = RingBuffer::new(96).unwrap();
    for bidx in 0..96 {
        src.block_mut(bidx).fill(bidx as f32);
    }

    c.bench_function("copy_96_blocks_wrapped", |b| {
        b.iter(|| {
            // SAFETY: both rings are exclusively owned by the bench.
            unsafe {
                src.copy_slice_to(&dst, 30 * BLOCK_SIZE, 0, 96 * BLOCK_SIZE)
                    .unwrap()
            }
        })
    });
}

criterion_group!(benches, bench_state_scans, bench_slice_copy);
criterion_main!(benches);
