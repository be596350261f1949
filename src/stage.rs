//! Trait-based stage definitions: the seam where generators, processors,
//! and outputs plug into the pipeline.

use crate::block::{BlockState, SampleBlock};
use crate::pipeline::PipelineState;
use crate::ring::RingBuffer;
use thiserror::Error;

/// Failure reported by a stage hook.
///
/// `init` failures abort pipeline startup before any worker spawns.
/// Runtime failures inside `process` are *not* reported this way; a stage
/// signals a bad block by returning
/// [`STATE_ERROR`](crate::block::STATE_ERROR) for it.
#[derive(Debug, Error)]
pub enum StageError {
    /// An I/O resource the stage needs could not be prepared.
    #[error("stage i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Any other initialization failure.
    #[error("stage failed: {0}")]
    Failed(String),
}

/// A pipeline stage.
///
/// Stages are owned by the pipeline and shared by reference across their
/// worker threads, so every hook takes `&self`; stages that carry mutable
/// resources (files, queues) wrap them in their own interior mutability.
///
/// The attribute accessors must return the same values for the lifetime of
/// the stage; the pipeline reads them once at spawn time.
pub trait Stage: Send + Sync {
    /// The block state a block must hold for this stage to claim it.
    fn entry_state(&self) -> BlockState;

    /// How many worker threads the pipeline spawns for this stage.
    /// Must be at least 1.
    fn thread_count(&self) -> usize {
        1
    }

    /// Index of the input buffer within this stage's group.
    fn in_buffer_index(&self) -> usize {
        0
    }

    /// Index of the output buffer within this stage's group.
    fn out_buffer_index(&self) -> usize {
        0
    }

    /// Temporal offset in blocks, added to the claimed input index to
    /// choose the output slot. Non-zero for delay-like stages.
    fn offset(&self) -> usize {
        0
    }

    /// Called once on the owning group's buffers before any worker starts.
    /// May pre-seed blocks (a delay stage writes its initial silence here).
    /// Never called on a live pipeline.
    fn init(&self, _buffers: &mut [RingBuffer]) -> Result<(), StageError> {
        Ok(())
    }

    /// Processes one claimed block.
    ///
    /// `input` is a snapshot of the claimed block; `output` is the
    /// destination slot chosen by the claimed index plus [`offset`]
    /// (the same slot for in-place stages). `block_number` is the absolute
    /// block number, `generator_flush_count * N + destination_index`, a
    /// monotonically increasing time coordinate that survives ring wrap.
    ///
    /// The returned byte is published as the terminal state of both the
    /// source and destination slots. Return
    /// [`STATE_ERROR`](crate::block::STATE_ERROR) to report a per-block
    /// failure. Must be finite; must not panic.
    ///
    /// [`offset`]: Stage::offset
    fn process(
        &self,
        state: &PipelineState,
        input: &SampleBlock,
        output: &mut SampleBlock,
        block_number: u64,
    ) -> BlockState;

    /// Called once after all workers for this stage have rejoined.
    /// Also called when startup fails before this stage ever ran, so
    /// implementations must tolerate `init` not having completed.
    fn cleanup(&self) {}
}
