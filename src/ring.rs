//! Ring buffer: a contiguous, 16-aligned array of sample blocks and a
//! parallel byte array of block states sharing one allocation.
//!
//! The state array is the sole synchronization mechanism. Sample memory
//! is read and written without locking under the single-writer invariant:
//! only the worker that CAS-claimed a block may mutate its samples, and
//! the supervisor touches blocks only across a quiesced flush handoff.
//! The `claimed_*` accessors and the copy/clear operations that go through
//! `&self` are therefore `unsafe`, with that protocol as their contract.

use crate::block::{BlockState, Sample, SampleBlock, BLOCK_SIZE};
use crate::scan::{self, LANE_WIDTH};
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

/// Errors raised by ring-buffer construction and copies.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    /// Block count is zero or not a multiple of the scan lane width.
    #[error("block count must be positive and a multiple of {LANE_WIDTH}, got {0}")]
    InvalidBufferSize(usize),
    /// A slice copy was asked to move more samples than the smaller of the
    /// two buffers can hold.
    #[error("slice of {requested} samples exceeds the smaller buffer's {capacity} samples")]
    RangeTooLarge {
        /// Requested sample count.
        requested: usize,
        /// Sample capacity of the smaller buffer.
        capacity: usize,
    },
}

/// Owns the single allocation backing a ring buffer: `block_count` state
/// bytes at offset 0, then `block_count` sample blocks. The allocation is
/// 16-byte aligned so the state array can be scanned in whole lanes; the
/// sample region stays `f32`-aligned because `block_count % 16 == 0`.
struct RingStorage {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RingStorage {
    fn allocate(block_count: usize) -> Result<Self, BufferError> {
        if block_count == 0 || block_count % LANE_WIDTH != 0 {
            return Err(BufferError::InvalidBufferSize(block_count));
        }
        let size = block_count
            .checked_mul(1 + std::mem::size_of::<SampleBlock>())
            .ok_or(BufferError::InvalidBufferSize(block_count))?;
        let layout = Layout::from_size_align(size, LANE_WIDTH)
            .map_err(|_| BufferError::InvalidBufferSize(block_count))?;
        // SAFETY: `layout` has non-zero size (block_count > 0).
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| handle_alloc_error(layout));
        Ok(Self { ptr, layout })
    }
}

impl Drop for RingStorage {
    fn drop(&mut self) {
        // SAFETY: `ptr` was allocated with exactly this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

// SAFETY: the state bytes are only ever accessed as `AtomicU8`, and sample
// memory is guarded by the claim protocol documented on the accessors.
unsafe impl Send for RingStorage {}
unsafe impl Sync for RingStorage {}

/// A fixed-capacity ring of sample blocks with per-block state bytes.
///
/// Move-only: constructed once at pipeline build time, recycled in place
/// forever, destroyed with the pipeline.
pub struct RingBuffer {
    storage: RingStorage,
    block_count: usize,
}

impl RingBuffer {
    /// Creates a ring of `block_count` zeroed blocks, all in
    /// [`STATE_DEFAULT`](crate::block::STATE_DEFAULT).
    ///
    /// `block_count` must be positive and divisible by 16.
    pub fn new(block_count: usize) -> Result<Self, BufferError> {
        let storage = RingStorage::allocate(block_count)?;
        Ok(Self {
            storage,
            block_count,
        })
    }

    /// Number of blocks in the ring.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Number of samples in the ring (`block_count * BLOCK_SIZE`).
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.block_count * BLOCK_SIZE
    }

    /// The whole state array.
    #[inline]
    pub fn states(&self) -> &[AtomicU8] {
        // SAFETY: the first `block_count` bytes of the allocation are the
        // state array, live as long as `self`, and `AtomicU8` has the
        // layout of `u8`.
        unsafe {
            std::slice::from_raw_parts(self.storage.ptr.as_ptr().cast::<AtomicU8>(), self.block_count)
        }
    }

    /// The state byte of block `idx`, wrapping modulo the block count.
    #[inline]
    pub fn state(&self, idx: usize) -> &AtomicU8 {
        &self.states()[idx % self.block_count]
    }

    #[inline]
    fn samples_ptr(&self) -> *mut Sample {
        // SAFETY: the sample region starts `block_count` bytes in; that
        // offset is a multiple of 16, so f32 alignment holds.
        unsafe { self.storage.ptr.as_ptr().add(self.block_count).cast::<Sample>() }
    }

    #[inline]
    fn block_ptr(&self, idx: usize) -> *mut SampleBlock {
        // SAFETY: `idx % block_count` is in bounds by construction.
        unsafe {
            self.samples_ptr()
                .add((idx % self.block_count) * BLOCK_SIZE)
                .cast::<SampleBlock>()
        }
    }

    /// Exclusive access to block `idx`, wrapping modulo the block count.
    ///
    /// Safe because `&mut self` proves no worker holds the ring.
    #[inline]
    pub fn block_mut(&mut self, idx: usize) -> &mut SampleBlock {
        // SAFETY: exclusive borrow of the whole ring.
        unsafe { &mut *self.block_ptr(idx) }
    }

    /// Shared read of block `idx` while the ring is live.
    ///
    /// # Safety
    ///
    /// The caller must hold the claim on this block (its state byte was
    /// CAS-ed to `PROCESSING` by the calling worker), or must otherwise
    /// guarantee that no thread is concurrently writing it.
    #[inline]
    pub unsafe fn claimed_block(&self, idx: usize) -> &SampleBlock {
        &*self.block_ptr(idx)
    }

    /// Mutable access to block `idx` while the ring is live.
    ///
    /// # Safety
    ///
    /// The caller must be the unique writer of this block: either it holds
    /// the claim that maps onto this destination slot, or the ring is
    /// quiesced under a flush handoff.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub unsafe fn claimed_block_mut(&self, idx: usize) -> &mut SampleBlock {
        &mut *self.block_ptr(idx)
    }

    /// Smallest block index whose state equals `state`, if any.
    ///
    /// Advisory: see the [`scan`](crate::scan) contract.
    #[inline]
    pub fn first_index_matching(&self, state: BlockState) -> Option<usize> {
        scan::first_match(self.states(), state)
    }

    /// Smallest block index whose state differs from `state`, if any.
    ///
    /// Advisory: see the [`scan`](crate::scan) contract.
    #[inline]
    pub fn first_index_not_matching(&self, state: BlockState) -> Option<usize> {
        scan::first_nonmatch(self.states(), state)
    }

    /// Overwrites every state byte with `state`.
    pub fn fill_states(&self, state: BlockState) {
        for s in self.states() {
            s.store(state, Ordering::Relaxed);
        }
    }

    /// Zeroes the entire allocation: every sample and every state byte.
    pub fn clear(&mut self) {
        // SAFETY: exclusive borrow.
        unsafe { self.clear_shared() }
    }

    /// Zeroes the entire allocation through a shared reference.
    ///
    /// # Safety
    ///
    /// No worker may be reading or writing this ring; the supervisor calls
    /// this only inside a quiesced flush handoff.
    pub unsafe fn clear_shared(&self) {
        std::ptr::write_bytes(self.storage.ptr.as_ptr(), 0, self.storage.layout.size());
    }

    /// Copies this whole ring (samples and states) into `dest` starting at
    /// `sample_offset` in the destination.
    ///
    /// # Safety
    ///
    /// Same contract as [`copy_slice_to`](Self::copy_slice_to).
    pub unsafe fn copy_to(&self, dest: &RingBuffer, sample_offset: usize) -> Result<(), BufferError> {
        self.copy_slice_to(dest, 0, sample_offset, self.sample_count())
    }

    /// Copies `range` samples starting at sample `from` in this ring
    /// (wrapping at `sample_count`) to sample position `to` in `dest`
    /// (wrapping at `dest.sample_count()`), together with the covered
    /// subset of the state array.
    ///
    /// The state copy truncates the final partial block and preserves the
    /// initial partial block, so a later stage never sees the state of a
    /// partially written block advance. An intermediate scratch buffer
    /// decouples the source wrap point from the destination wrap point;
    /// the two rings may have different block counts.
    ///
    /// Fails with [`BufferError::RangeTooLarge`] if `range` exceeds the
    /// sample capacity of the smaller ring.
    ///
    /// # Safety
    ///
    /// No worker may be writing the covered source region or touching the
    /// covered destination region. The supervisor guarantees this with the
    /// flush quiescence protocol; tests guarantee it by running
    /// single-threaded.
    pub unsafe fn copy_slice_to(
        &self,
        dest: &RingBuffer,
        from: usize,
        to: usize,
        range: usize,
    ) -> Result<(), BufferError> {
        let src_len = self.sample_count();
        let dst_len = dest.sample_count();
        let capacity = src_len.min(dst_len);
        if range > capacity {
            return Err(BufferError::RangeTooLarge {
                requested: range,
                capacity,
            });
        }
        if range == 0 {
            return Ok(());
        }

        let from = from % src_len;
        let to = to % dst_len;

        // Samples, through scratch: gather the (possibly wrapped) source
        // slice, then scatter it across the (possibly wrapped) destination.
        let mut scratch = vec![0.0 as Sample; range];
        let src_head = range.min(src_len - from);
        std::ptr::copy_nonoverlapping(self.samples_ptr().add(from), scratch.as_mut_ptr(), src_head);
        std::ptr::copy_nonoverlapping(
            self.samples_ptr(),
            scratch.as_mut_ptr().add(src_head),
            range - src_head,
        );
        let dst_head = range.min(dst_len - to);
        std::ptr::copy_nonoverlapping(scratch.as_ptr(), dest.samples_ptr().add(to), dst_head);
        std::ptr::copy_nonoverlapping(
            scratch.as_ptr().add(dst_head),
            dest.samples_ptr(),
            range - dst_head,
        );

        // States, also through scratch so self-copies stay coherent. The
        // first state byte is the one of the block containing `from`; the
        // count rounds down so a trailing partial block's state is not
        // carried over.
        let slice_blocks = range / BLOCK_SIZE;
        let src_base = from / BLOCK_SIZE;
        let dst_base = to / BLOCK_SIZE;
        let mut state_scratch = vec![0u8; slice_blocks];
        for (i, slot) in state_scratch.iter_mut().enumerate() {
            *slot = self.state(src_base + i).load(Ordering::Relaxed);
        }
        for (i, slot) in state_scratch.iter().enumerate() {
            dest.state(dst_base + i).store(*slot, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("block_count", &self.block_count)
            .finish_non_exhaustive()
    }
}
