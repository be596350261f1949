//! State-array scans over 16-byte lanes.
//!
//! On `x86_64`, these compile to an SSE2 equality mask plus a
//! trailing-zero count per lane. On other targets an equivalent scalar
//! implementation is used; only scan throughput differs.
//!
//! Scans are advisory and unsynchronized: the state array is concurrently
//! mutated by workers, so a caller may observe a stale byte. A state set
//! concurrently may not yet be visible (false negative) and a state
//! observed may have changed before the caller acts on it (false
//! positive). The claim CAS that follows a scan is what gates exclusive
//! access; the scan only chooses a candidate index.

use std::sync::atomic::AtomicU8;

/// Bytes examined per scan step. State arrays must be a multiple of this
/// long so the lane loop never indexes past the array.
pub const LANE_WIDTH: usize = 16;

/// Returns the smallest index whose state equals `target`, if any.
#[inline]
pub(crate) fn first_match(states: &[AtomicU8], target: u8) -> Option<usize> {
    debug_assert_eq!(states.len() % LANE_WIDTH, 0);
    #[cfg(target_arch = "x86_64")]
    {
        first_match_sse2(states, target)
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        first_match_scalar(states, target)
    }
}

/// Returns the smallest index whose state differs from `target`, if any.
#[inline]
pub(crate) fn first_nonmatch(states: &[AtomicU8], target: u8) -> Option<usize> {
    debug_assert_eq!(states.len() % LANE_WIDTH, 0);
    #[cfg(target_arch = "x86_64")]
    {
        first_nonmatch_sse2(states, target)
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        first_nonmatch_scalar(states, target)
    }
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn first_match_sse2(states: &[AtomicU8], target: u8) -> Option<usize> {
    use core::arch::x86_64::{_mm_cmpeq_epi8, _mm_loadu_si128, _mm_movemask_epi8, _mm_set1_epi8};

    // SAFETY: `AtomicU8` has the layout of `u8`, the slice length is a
    // multiple of the lane width, and the loads are unaligned-tolerant.
    // Racing writers make the observed bytes stale at worst; the contract
    // above makes staleness the caller's problem, not ours.
    unsafe {
        let needle = _mm_set1_epi8(target as i8);
        let base = states.as_ptr().cast::<core::arch::x86_64::__m128i>();
        for lane in 0..states.len() / LANE_WIDTH {
            let mask = _mm_movemask_epi8(_mm_cmpeq_epi8(_mm_loadu_si128(base.add(lane)), needle));
            if mask != 0 {
                return Some(lane * LANE_WIDTH + (mask as u32).trailing_zeros() as usize);
            }
        }
    }
    None
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn first_nonmatch_sse2(states: &[AtomicU8], target: u8) -> Option<usize> {
    use core::arch::x86_64::{_mm_cmpeq_epi8, _mm_loadu_si128, _mm_movemask_epi8, _mm_set1_epi8};

    // SAFETY: as in `first_match_sse2`.
    unsafe {
        let needle = _mm_set1_epi8(target as i8);
        let base = states.as_ptr().cast::<core::arch::x86_64::__m128i>();
        for lane in 0..states.len() / LANE_WIDTH {
            let mask = _mm_movemask_epi8(_mm_cmpeq_epi8(_mm_loadu_si128(base.add(lane)), needle));
            let inverted = !(mask as u32) & 0xFFFF;
            if inverted != 0 {
                return Some(lane * LANE_WIDTH + inverted.trailing_zeros() as usize);
            }
        }
    }
    None
}

#[cfg(any(test, not(target_arch = "x86_64")))]
#[inline]
fn first_match_scalar(states: &[AtomicU8], target: u8) -> Option<usize> {
    use std::sync::atomic::Ordering;
    states
        .iter()
        .position(|s| s.load(Ordering::Relaxed) == target)
}

#[cfg(any(test, not(target_arch = "x86_64")))]
#[inline]
fn first_nonmatch_scalar(states: &[AtomicU8], target: u8) -> Option<usize> {
    use std::sync::atomic::Ordering;
    states
        .iter()
        .position(|s| s.load(Ordering::Relaxed) != target)
}
