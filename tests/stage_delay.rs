//! Delay-stage temporal offset: a claim on input index `i` lands the copy
//! at `i + offset`, and the pre-seeded silence is what the first `offset`
//! destination slots deliver.
//!
//! The claim/process/publish protocol is scripted step by step here, so
//! the offset arithmetic is observable without racing a live pipeline.

use sluice::block::{STATE_DEFAULT, STATE_PROCESSED, STATE_PROCESSING};
use sluice::pipeline::PipelineState;
use sluice::ring::RingBuffer;
use sluice::stage::Stage;
use sluice::stages::DelayStage;
use std::sync::atomic::Ordering;
use std::time::Duration;

const BLOCKS: usize = 16;
const ENTRY: u8 = 0x02;

/// One worker iteration: scan, claim, process, publish at the shifted
/// destination index in both buffers. Returns the (claimed, destination)
/// pair, or `None` when no block carries the entry tag.
fn step(
    stage: &dyn Stage,
    state: &PipelineState,
    from: &mut RingBuffer,
    to: &mut RingBuffer,
) -> Option<(usize, usize)> {
    let idx = from.first_index_matching(stage.entry_state())?;
    let dst = idx + stage.offset();

    from.state(idx)
        .compare_exchange(
            stage.entry_state(),
            STATE_PROCESSING,
            Ordering::AcqRel,
            Ordering::Relaxed,
        )
        .expect("single-threaded claim cannot race");

    let input = *from.block_mut(idx);
    let exit = stage.process(state, &input, to.block_mut(dst), dst as u64);

    from.state(dst).store(exit, Ordering::Release);
    to.state(dst).store(exit, Ordering::Release);
    Some((idx, dst % to.block_count()))
}

#[test]
fn offset_shifts_the_preseeded_silence_into_the_output() {
    // 100 ms at 48 kHz is 4800 samples: a ten-block offset.
    let delay = DelayStage::new(Duration::from_millis(100), ENTRY, STATE_PROCESSED);
    assert_eq!(delay.offset(), 10);

    let mut buffers = vec![
        RingBuffer::new(BLOCKS).unwrap(),
        RingBuffer::new(BLOCKS).unwrap(),
    ];
    delay.init(&mut buffers).unwrap();
    let (head, tail) = buffers.split_at_mut(1);
    let from = &mut head[0];
    let to = &mut tail[0];

    let state = PipelineState::new();
    let mut copied = Vec::new();
    while let Some(pair) = step(&delay, &state, from, to) {
        copied.push(pair);
        assert!(copied.len() <= BLOCKS, "claim loop ran away");
    }

    // Exactly the ten pre-seeded silent blocks were claimable: publishing
    // at the shifted index overwrote the entry tags ten slots ahead, so
    // the NaN tail was never claimed. This is the documented stall
    // behavior of offset stages.
    assert_eq!(
        copied.iter().map(|&(i, _)| i).collect::<Vec<_>>(),
        (0..10).collect::<Vec<_>>()
    );

    for &(claimed, dst) in &copied {
        assert_eq!(dst, (claimed + 10) % BLOCKS);
        // Both buffers carry the published state at the destination index.
        assert_eq!(from.state(dst).load(Ordering::Relaxed), STATE_PROCESSED);
        assert_eq!(to.state(dst).load(Ordering::Relaxed), STATE_PROCESSED);
        // The delivered blocks are the delay's silence.
        assert!(
            to.block_mut(dst).iter().all(|&s| s == 0.0),
            "destination block {dst} is not silent"
        );
    }

    // Slots the publications never reached keep their default state, and
    // input slots whose claim was stranded stay in PROCESSING.
    assert_eq!(to.state(4).load(Ordering::Relaxed), STATE_DEFAULT);
    assert_eq!(from.state(4).load(Ordering::Relaxed), STATE_PROCESSING);
}
