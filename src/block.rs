//! Core sample/block type definitions and reserved block states.

/// A single audio sample.
pub type Sample = f32;

/// Number of samples in one block, the unit of coordination.
pub const BLOCK_SIZE: usize = 480;

/// Nominal sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48_000;

/// A fixed-size tile of samples. Blocks are claimed, processed, and
/// published as a whole; no stage ever operates on a partial block.
pub type SampleBlock = [Sample; BLOCK_SIZE];

/// Per-block lifecycle tag, one byte per block.
///
/// The state byte is the sole synchronization primitive in the pipeline:
/// a worker may mutate a block's samples only after CAS-ing its state
/// from the stage's entry value to [`STATE_PROCESSING`].
pub type BlockState = u8;

/// Empty/unclaimed. Freshly constructed and flush-reset blocks hold this.
pub const STATE_DEFAULT: BlockState = 0x00;

/// A stage's `process` reported a per-block failure. The block stays in
/// this state until a recovery stage claims it or the ring wraps over it.
pub const STATE_ERROR: BlockState = 0xFD;

/// A worker holds the block via a successful claim CAS.
pub const STATE_PROCESSING: BlockState = 0xFE;

/// Terminal state; the block is consumable by a group flush.
pub const STATE_PROCESSED: BlockState = 0xFF;

/// First user-assignable stage tag. Values `0x01..=0xFC` are free for
/// per-stage entry/exit chaining.
pub const STATE_FIRST_USER: BlockState = 0x01;

/// Last user-assignable stage tag.
pub const STATE_LAST_USER: BlockState = 0xFC;

/// A block of silence. Useful for pre-seeding delay lines.
pub const SILENT_BLOCK: SampleBlock = [0.0; BLOCK_SIZE];

/// Maps a block state to a human-readable name (for diagnostics only).
pub const fn state_name(state: BlockState) -> &'static str {
    match state {
        STATE_DEFAULT => "DEFAULT",
        STATE_ERROR => "ERROR",
        STATE_PROCESSING => "PROCESSING",
        STATE_PROCESSED => "PROCESSED",
        _ => "USER",
    }
}
