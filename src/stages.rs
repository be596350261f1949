//! The built-in stage catalog: a sine generator, a gain stage, a
//! block-offset delay, two NaN-masked output writers, and a lock-free tap.
//!
//! Tag convention: a stage's exit tag is the entry tag of the next stage
//! in its group. The supervisor seeds a freshly flushed head buffer with
//! the entry tag of the group's first stage, so the first processing
//! stage conventionally enters on `0x01` and the first output stage on
//! `0x03`. Output stages exit `DEFAULT`, draining their buffer back to a
//! reusable state.

use crate::block::{
    BlockState, SampleBlock, BLOCK_SIZE, SAMPLE_RATE, STATE_DEFAULT, STATE_ERROR, STATE_PROCESSED,
};
use crate::pipeline::PipelineState;
use crate::probe::TapFrame;
use crate::ring::RingBuffer;
use crate::stage::{Stage, StageError};
use rtrb::Producer;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// Generates a fixed-frequency sine wave into every claimed block.
///
/// Enters on `DEFAULT` (freshly cleared blocks) and exits `PROCESSED`, so
/// a generator group driven by this stage becomes flushable once its ring
/// fills.
pub struct SineGenerator {
    freq: f32,
    /// Whole-sample period of the waveform; the phase argument is reduced
    /// modulo this to stay near the origin and bound f32 imprecision.
    period: u64,
}

impl SineGenerator {
    /// Creates a generator for `freq` Hz. `freq` must be positive and at
    /// most the Nyquist rate.
    pub fn new(freq: f32) -> Self {
        assert!(
            freq > 0.0 && freq <= SAMPLE_RATE as f32 / 2.0,
            "sine frequency out of range: {freq}"
        );
        let period = (SAMPLE_RATE as f32 / freq).round().max(1.0) as u64;
        Self { freq, period }
    }
}

impl Stage for SineGenerator {
    fn entry_state(&self) -> BlockState {
        STATE_DEFAULT
    }

    fn process(
        &self,
        _state: &PipelineState,
        _input: &SampleBlock,
        output: &mut SampleBlock,
        block_number: u64,
    ) -> BlockState {
        for (j, sample) in output.iter_mut().enumerate() {
            let sample_index = block_number * BLOCK_SIZE as u64 + j as u64;
            let t = (sample_index % self.period) as f32 / SAMPLE_RATE as f32;
            *sample = (std::f32::consts::TAU * self.freq * t).sin();
        }
        STATE_PROCESSED
    }
}

/// Multiplies every sample by a fixed factor.
pub struct GainStage {
    multiplier: f32,
    entry: BlockState,
    exit: BlockState,
}

impl GainStage {
    /// Creates a gain stage claiming `entry` blocks and publishing `exit`.
    pub fn new(multiplier: f32, entry: BlockState, exit: BlockState) -> Self {
        Self {
            multiplier,
            entry,
            exit,
        }
    }
}

impl Stage for GainStage {
    fn entry_state(&self) -> BlockState {
        self.entry
    }

    fn process(
        &self,
        _state: &PipelineState,
        input: &SampleBlock,
        output: &mut SampleBlock,
        _block_number: u64,
    ) -> BlockState {
        for (out, &sample) in output.iter_mut().zip(input) {
            *out = sample * self.multiplier;
        }
        self.exit
    }
}

/// Delays the signal by a whole number of blocks using the worker's
/// temporal offset: the claim on input index `i` lands the copy at
/// `i + offset` in the group's second buffer.
///
/// `init` pre-seeds the input buffer with the leading delay's worth of
/// silence, NaN elsewhere, and marks every block with the entry tag, so
/// the first `offset` destination blocks deliver silence before real
/// input appears. Downstream NaN-masked writers skip the unseeded tail.
pub struct DelayStage {
    delay_samples: usize,
    entry: BlockState,
    exit: BlockState,
}

impl DelayStage {
    /// Creates a delay stage. The delay is rounded down to whole samples;
    /// the temporal offset is its whole-block part.
    pub fn new(delay: Duration, entry: BlockState, exit: BlockState) -> Self {
        let delay_samples =
            (delay.as_micros() * u128::from(SAMPLE_RATE) / 1_000_000) as usize;
        Self {
            delay_samples,
            entry,
            exit,
        }
    }

    /// The delay expressed in whole blocks; equals [`Stage::offset`].
    pub fn delay_blocks(&self) -> usize {
        self.delay_samples / BLOCK_SIZE
    }
}

impl Stage for DelayStage {
    fn entry_state(&self) -> BlockState {
        self.entry
    }

    fn out_buffer_index(&self) -> usize {
        1
    }

    fn offset(&self) -> usize {
        self.delay_blocks()
    }

    fn init(&self, buffers: &mut [RingBuffer]) -> Result<(), StageError> {
        let ring = &mut buffers[self.in_buffer_index()];
        if self.delay_samples > ring.sample_count() {
            return Err(StageError::Failed(format!(
                "delay of {} samples exceeds the {}-sample input buffer",
                self.delay_samples,
                ring.sample_count()
            )));
        }
        for b in 0..ring.block_count() {
            let base = b * BLOCK_SIZE;
            for (j, sample) in ring.block_mut(b).iter_mut().enumerate() {
                *sample = if base + j < self.delay_samples {
                    0.0
                } else {
                    f32::NAN
                };
            }
        }
        ring.fill_states(self.entry);
        Ok(())
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

/// Dumps raw little-endian f32 PCM to a file, skipping NaN samples.
///
/// The file is created in `init`, so an unwritable path surfaces as a
/// startup failure before any worker spawns.
pub struct PcmWriterStage {
    path: PathBuf,
    entry: BlockState,
    file: Mutex<Option<BufWriter<File>>>,
}

impl PcmWriterStage {
    /// Creates a writer that will dump to `path`.
    pub fn new(path: impl Into<PathBuf>, entry: BlockState) -> Self {
        Self {
            path: path.into(),
            entry,
            file: Mutex::new(None),
        }
    }
}

impl Stage for PcmWriterStage {
    fn entry_state(&self) -> BlockState {
        self.entry
    }

    fn init(&self, _buffers: &mut [RingBuffer]) -> Result<(), StageError> {
        let file = File::create(&self.path)?;
        let Ok(mut guard) = self.file.lock() else {
            return Err(StageError::Failed("writer lock poisoned".into()));
        };
        *guard = Some(BufWriter::new(file));
        Ok(())
    }

    fn process(
        &self,
        _state: &PipelineState,
        input: &SampleBlock,
        _output: &mut SampleBlock,
        _block_number: u64,
    ) -> BlockState {
        let Ok(mut guard) = self.file.lock() else {
            return STATE_ERROR;
        };
        let Some(writer) = guard.as_mut() else {
            return STATE_ERROR;
        };
        for &sample in input.iter() {
            if sample.is_nan() {
                continue;
            }
            if writer.write_all(&sample.to_le_bytes()).is_err() {
                return STATE_ERROR;
            }
        }
        STATE_DEFAULT
    }

    fn cleanup(&self) {
        if let Ok(mut guard) = self.file.lock() {
            if let Some(writer) = guard.as_mut() {
                let _ = writer.flush();
            }
        }
    }
}

/// Writes every non-NaN sample as a text line to any writer.
pub struct LoggerStage<W> {
    sink: Mutex<W>,
    entry: BlockState,
}

impl LoggerStage<io::Stdout> {
    /// A logger printing to standard output.
    pub fn stdout(entry: BlockState) -> Self {
        Self::new(io::stdout(), entry)
    }
}

impl<W: Write + Send> LoggerStage<W> {
    /// Creates a logger writing to `sink`.
    pub fn new(sink: W, entry: BlockState) -> Self {
        Self {
            sink: Mutex::new(sink),
            entry,
        }
    }
}

impl<W: Write + Send> Stage for LoggerStage<W> {
    fn entry_state(&self) -> BlockState {
        self.entry
    }

    fn process(
        &self,
        _state: &PipelineState,
        input: &SampleBlock,
        _output: &mut SampleBlock,
        _block_number: u64,
    ) -> BlockState {
        let Ok(mut sink) = self.sink.lock() else {
            return STATE_ERROR;
        };
        for &sample in input.iter() {
            if !sample.is_nan() && writeln!(sink, "{sample}").is_err() {
                return STATE_ERROR;
            }
        }
        STATE_DEFAULT
    }

    fn cleanup(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.flush();
        }
    }
}

/// Forwards each claimed block into a [`TapFrame`] queue, dropping frames
/// when the observer falls behind.
pub struct TapStage {
    tx: Mutex<Producer<TapFrame>>,
    entry: BlockState,
}

impl TapStage {
    /// Creates a tap feeding `tx`.
    pub fn new(tx: Producer<TapFrame>, entry: BlockState) -> Self {
        Self {
            tx: Mutex::new(tx),
            entry,
        }
    }
}

impl Stage for TapStage {
    fn entry_state(&self) -> BlockState {
        self.entry
    }

    fn process(
        &self,
        _state: &PipelineState,
        input: &SampleBlock,
        _output: &mut SampleBlock,
        block_number: u64,
    ) -> BlockState {
        let Ok(mut tx) = self.tx.lock() else {
            return STATE_ERROR;
        };
        let _ = tx.push(TapFrame {
            block_number,
            samples: *input,
        });
        STATE_DEFAULT
    }
}
