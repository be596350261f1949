//! Stage worker: the claim/process/publish loop.
//!
//! IMPORTANT: nothing in this loop may allocate, lock, log, or panic.
//! Workers busy-loop on atomic reads and CAS; the only blocking they ever
//! experience is OS preemption, plus a yield hint whenever no claimable
//! block is found.

use crate::block::STATE_PROCESSING;
use crate::pipeline::{ExecutionMode, PipelineState};
use crate::ring::RingBuffer;
use crate::stage::Stage;
use std::sync::atomic::{AtomicBool, Ordering};

/// Everything a worker thread borrows from the pipeline for its lifetime.
pub(crate) struct WorkerContext<'a> {
    pub stage: &'a dyn Stage,
    pub flushing: &'a AtomicBool,
    pub state: &'a PipelineState,
    pub from: &'a RingBuffer,
    pub to: &'a RingBuffer,
    /// Block count of the generator tail; one generator flush advances
    /// absolute block numbers by this much.
    pub epoch_blocks: u64,
}

/// Runs one worker until the pipeline stops.
///
/// Each iteration: locate the lowest input block in this stage's entry
/// state, snapshot the generator-flush counter, claim the block with a
/// weak CAS (`entry → PROCESSING`), process it, and publish the returned
/// state into both the input and output state bytes at the destination
/// index.
pub(crate) fn run_worker(ctx: WorkerContext<'_>) {
    let entry = ctx.stage.entry_state();
    let offset = ctx.stage.offset();

    loop {
        match ctx.state.mode() {
            ExecutionMode::Stopped => return,
            ExecutionMode::Executing => {}
            ExecutionMode::Paused => {
                std::thread::yield_now();
                continue;
            }
        }
        if ctx.flushing.load(Ordering::Acquire) {
            std::thread::yield_now();
            continue;
        }

        let Some(idx) = ctx.from.first_index_matching(entry) else {
            std::thread::yield_now();
            continue;
        };
        let flush_count = ctx.state.generator_flushes();
        let dst = idx + offset;

        // Claim. A spurious CAS failure retries; losing the expected state
        // (another worker advanced it, a flush reset it) or a rising flush
        // flag abandons the attempt without error.
        let slot = ctx.from.state(idx);
        let mut claimed = false;
        while !ctx.flushing.load(Ordering::Relaxed) {
            match slot.compare_exchange_weak(
                entry,
                STATE_PROCESSING,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    claimed = true;
                    break;
                }
                Err(observed) if observed == entry => continue,
                Err(_) => break,
            }
        }
        if !claimed {
            continue;
        }

        // SAFETY: the successful CAS makes this worker the unique owner of
        // the input block until publication, and stage topology maps
        // exactly one claim onto each destination slot. The input is
        // snapshotted so in-place stages never alias the output borrow.
        let input = unsafe { *ctx.from.claimed_block(idx) };
        let output = unsafe { ctx.to.claimed_block_mut(dst) };
        let out_state = ctx.stage.process(
            ctx.state,
            &input,
            output,
            flush_count * ctx.epoch_blocks + dst as u64,
        );

        // Publication: release stores keep the new states from becoming
        // visible before the sample stores above.
        ctx.from.state(dst).store(out_state, Ordering::Release);
        ctx.to.state(dst).store(out_state, Ordering::Release);
    }
}
