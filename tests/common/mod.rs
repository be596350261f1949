//! Stage doubles and polling helpers shared by the scenario tests.

#![allow(dead_code)]

use sluice::block::{BlockState, SampleBlock, BLOCK_SIZE, STATE_PROCESSED};
use sluice::pipeline::{ExecutionMode, PipelineControl, PipelineState};
use sluice::probe::TapFrame;
use sluice::stage::Stage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Entry tag the supervisor seeds into the processing head at a
/// generator flush (first processing stage's entry).
pub const PROC_ENTRY: BlockState = 0x01;

/// Entry tag the supervisor seeds into the output head at a processing
/// flush (first output stage's entry).
pub const OUT_ENTRY: BlockState = 0x03;

/// Generator whose sample `j` of absolute block `b` is `b * 480 + j`.
/// Every value is an exactly representable f32, so handoffs can be
/// checked bit for bit.
pub struct SequenceGenerator {
    pub threads: usize,
}

impl Stage for SequenceGenerator {
    fn entry_state(&self) -> BlockState {
        sluice::block::STATE_DEFAULT
    }

    fn thread_count(&self) -> usize {
        self.threads
    }

    fn process(
        &self,
        _state: &PipelineState,
        _input: &SampleBlock,
        output: &mut SampleBlock,
        block_number: u64,
    ) -> BlockState {
        for (j, sample) in output.iter_mut().enumerate() {
            *sample = (block_number * BLOCK_SIZE as u64 + j as u64) as f32;
        }
        STATE_PROCESSED
    }
}

/// Generator emitting a constant value.
pub struct ConstGenerator {
    pub value: f32,
    pub threads: usize,
}

impl Stage for ConstGenerator {
    fn entry_state(&self) -> BlockState {
        sluice::block::STATE_DEFAULT
    }

    fn thread_count(&self) -> usize {
        self.threads
    }

    fn process(
        &self,
        _state: &PipelineState,
        _input: &SampleBlock,
        output: &mut SampleBlock,
        _block_number: u64,
    ) -> BlockState {
        output.fill(self.value);
        STATE_PROCESSED
    }
}

/// Generator emitting `valid` real samples followed by a NaN tail.
pub struct NanTailGenerator {
    pub valid: usize,
}

impl Stage for NanTailGenerator {
    fn entry_state(&self) -> BlockState {
        sluice::block::STATE_DEFAULT
    }

    fn process(
        &self,
        _state: &PipelineState,
        _input: &SampleBlock,
        output: &mut SampleBlock,
        _block_number: u64,
    ) -> BlockState {
        for (j, sample) in output.iter_mut().enumerate() {
            *sample = if j < self.valid { 1.0 } else { f32::NAN };
        }
        STATE_PROCESSED
    }
}

/// In-place copy stage.
pub struct Identity {
    pub entry: BlockState,
    pub exit: BlockState,
    pub threads: usize,
}

impl Stage for Identity {
    fn entry_state(&self) -> BlockState {
        self.entry
    }

    fn thread_count(&self) -> usize {
        self.threads
    }

    fn process(
        &self,
        _state: &PipelineState,
        input: &SampleBlock,
        output: &mut SampleBlock,
        _block_number: u64,
    ) -> BlockState {
        output.copy_from_slice(input);
        self.exit
    }
}

/// Identity that records every absolute block number it was handed, for
/// exactly-once accounting across worker threads.
pub struct CountingIdentity {
    pub entry: BlockState,
    pub exit: BlockState,
    pub threads: usize,
    pub seen: Arc<Mutex<Vec<u64>>>,
}

impl Stage for CountingIdentity {
    fn entry_state(&self) -> BlockState {
        self.entry
    }

    fn thread_count(&self) -> usize {
        self.threads
    }

    fn process(
        &self,
        _state: &PipelineState,
        input: &SampleBlock,
        output: &mut SampleBlock,
        block_number: u64,
    ) -> BlockState {
        self.seen.lock().unwrap().push(block_number);
        output.copy_from_slice(input);
        self.exit
    }
}

/// Parks inside `process` until its gate opens, freezing the claimed
/// buffer in place; bails out cleanly when the pipeline stops.
pub struct GateStage {
    pub entry: BlockState,
    pub gate: Arc<AtomicBool>,
}

impl Stage for GateStage {
    fn entry_state(&self) -> BlockState {
        self.entry
    }

    fn process(
        &self,
        state: &PipelineState,
        input: &SampleBlock,
        output: &mut SampleBlock,
        _block_number: u64,
    ) -> BlockState {
        while !self.gate.load(Ordering::Acquire) {
            if state.mode() == ExecutionMode::Stopped {
                return self.entry;
            }
            std::thread::yield_now();
        }
        output.copy_from_slice(input);
        STATE_PROCESSED
    }
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Drains the tap until at least `min_frames` arrived, stopping the
/// pipeline and panicking if `timeout` elapses first.
pub fn collect_frames(
    rx: &mut rtrb::Consumer<TapFrame>,
    min_frames: usize,
    timeout: Duration,
    control: &PipelineControl,
) -> Vec<TapFrame> {
    let start = Instant::now();
    let mut frames = Vec::new();
    while frames.len() < min_frames {
        while let Ok(frame) = rx.pop() {
            frames.push(frame);
        }
        if start.elapsed() > timeout {
            control.stop();
            panic!(
                "collected only {} of {} frames within {timeout:?}",
                frames.len(),
                min_frames
            );
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    frames
}
