//! # Sluice
//!
//! A lock-free, block-based, multi-threaded audio pipeline kernel.
//!
//! ## Architecture
//!
//! Fixed-size blocks of f32 samples traverse a strict three-group linear
//! chain: **generators → processors → outputs**. Each group owns ring
//! buffers whose per-block state bytes are the only synchronization
//! primitive in the system:
//!
//! - **Workers** scan a buffer's state array (16-byte SIMD lanes) for
//!   their stage's entry tag, claim a block with a byte-wide CAS, process
//!   it, and publish the exit tag with release stores.
//! - The **supervisor** watches for a group's tail buffer to become
//!   entirely `PROCESSED` while the next group's endpoints are entirely
//!   `DEFAULT`, then hands the tail over to the next group's head under a
//!   two-fence quiescence protocol.
//!
//! No mutex, condition variable, or queue is involved in steady state.
//!
//! ## Real-Time Safety
//!
//! Worker loops never allocate, lock, log, or block on OS primitives;
//! they busy-loop on atomics with a yield hint when idle. Allocation
//! happens at construction time and inside the supervisor's flush copies.
//!
//! ## Invariants
//!
//! - At most one worker holds any block in `PROCESSING` (single-writer
//!   rule, enforced by the claim CAS).
//! - State transitions per block are totally ordered; publication is
//!   never visible before the sample stores it covers.
//! - A group flush copies only fully processed tails into fully drained
//!   heads; workers are quiesced across the handoff.
//! - Every buffer's block count is divisible by 16.
//!
//! ## Example
//!
//! ```rust
//! use sluice::block::STATE_PROCESSED;
//! use sluice::pipeline::Pipeline;
//! use sluice::ring::RingBuffer;
//! use sluice::stage::Stage;
//! use sluice::stages::{GainStage, LoggerStage, SineGenerator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = Pipeline::new(
//!     vec![Box::new(SineGenerator::new(1000.0)) as Box<dyn Stage>],
//!     vec![Box::new(GainStage::new(0.5, 0x01, STATE_PROCESSED)) as Box<dyn Stage>],
//!     vec![Box::new(LoggerStage::new(std::io::sink(), 0x03)) as Box<dyn Stage>],
//!     vec![RingBuffer::new(96)?],
//!     vec![RingBuffer::new(96)?],
//!     vec![RingBuffer::new(96)?],
//! )?;
//!
//! let handle = pipeline.run_async();
//! let control = handle.control();
//! while control.generator_flushes() == 0 {
//!     std::thread::yield_now();
//! }
//! handle.stop();
//! let _pipeline = handle.join()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod block;
pub mod pipeline;
pub mod probe;
pub mod ring;
pub mod scan;
pub mod stage;
pub mod stages;
mod worker;
