//! Lock-free sample tap for pipeline → observer communication.
//!
//! A tap forwards whole processed blocks out of the pipeline over an SPSC
//! queue so a non-real-time thread can record, analyze, or display them.
//!
//! # Design Philosophy
//!
//! The producing side lives inside a worker's `process` call, so it must
//! never allocate, lock, or block. Frames are fixed-size and `Copy`; if
//! the queue is full the frame is dropped, which is preferable to stalling
//! the pipeline.

use crate::block::SampleBlock;
use rtrb::{Consumer, Producer, RingBuffer};

/// Default tap queue capacity in frames.
///
/// At 100 blocks per second this buys the consumer ten seconds of slack
/// before frames start dropping.
pub const TAP_QUEUE_CAPACITY: usize = 1024;

/// One processed block, stamped with its absolute block number.
#[derive(Debug, Clone, Copy)]
pub struct TapFrame {
    /// `generator_flush_count · N + destination_index` at process time.
    pub block_number: u64,
    /// The block's samples.
    pub samples: SampleBlock,
}

/// Creates a tap queue pair with the default capacity.
///
/// Returns (producer for the pipeline side, consumer for the observer).
pub fn new_tap_queue() -> (Producer<TapFrame>, Consumer<TapFrame>) {
    new_tap_queue_with_capacity(TAP_QUEUE_CAPACITY)
}

/// Creates a tap queue pair holding up to `capacity` frames.
pub fn new_tap_queue_with_capacity(
    capacity: usize,
) -> (Producer<TapFrame>, Consumer<TapFrame>) {
    RingBuffer::new(capacity)
}

/// Drains all pending frames from the observer side.
pub fn drain_tap(rx: &mut Consumer<TapFrame>) -> Vec<TapFrame> {
    let mut frames = Vec::with_capacity(rx.slots());
    while let Ok(frame) = rx.pop() {
        frames.push(frame);
    }
    frames
}
