//! Pipeline supervisor: owns the buffers and stages, spawns the workers,
//! and drives the group-to-group flush handoffs.
//!
//! Coordination needs no mutex, condition variable, or queue: byte-wide
//! CAS on block states (in the workers), release stores on publication,
//! and two process-wide fences bracketing each flush are the whole story.

use crate::block::{STATE_DEFAULT, STATE_PROCESSED};
use crate::ring::RingBuffer;
use crate::stage::{Stage, StageError};
use crate::worker::{self, WorkerContext};
use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors raised by pipeline construction and startup.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline was constructed with zero output stages.
    #[error("pipeline requires at least one output stage")]
    EmptyOutput,
    /// A stage's `init` hook signaled failure; no worker was started.
    #[error("stage initialization failed: {0}")]
    StageInitFailure(#[from] StageError),
}

/// Execution mode of the pipeline, stored as an atomic byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Workers return, the supervisor exits, `run` unwinds to its caller.
    Stopped = 0,
    /// Workers idle; the supervisor keeps evaluating flush conditions,
    /// which cannot become true while generation is paused.
    Paused = 1,
    /// Normal operation.
    Executing = 2,
}

impl ExecutionMode {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => ExecutionMode::Paused,
            2 => ExecutionMode::Executing,
            // Fail closed: an unknown byte reads as stopped.
            _ => ExecutionMode::Stopped,
        }
    }
}

/// Process-wide pipeline counters and execution mode. All fields are
/// atomic; stages receive a shared reference on every `process` call.
#[derive(Debug)]
pub struct PipelineState {
    generator_flushes: AtomicU64,
    processing_flushes: AtomicU64,
    output_flushes: AtomicU64,
    mode: AtomicU8,
}

impl PipelineState {
    /// A standalone state block, all counters zero, mode `Stopped`.
    ///
    /// Pipelines create their own; this is for driving a stage's
    /// `process` outside a pipeline (tests, offline rendering).
    pub fn new() -> Self {
        Self {
            generator_flushes: AtomicU64::new(0),
            processing_flushes: AtomicU64::new(0),
            output_flushes: AtomicU64::new(0),
            mode: AtomicU8::new(ExecutionMode::Stopped as u8),
        }
    }

    /// Number of generator→processing handoffs so far. Monotonic.
    #[inline]
    pub fn generator_flushes(&self) -> u64 {
        self.generator_flushes.load(Ordering::Relaxed)
    }

    /// Number of processing→output handoffs so far. Monotonic.
    #[inline]
    pub fn processing_flushes(&self) -> u64 {
        self.processing_flushes.load(Ordering::Relaxed)
    }

    /// Number of output-group flushes. Present for symmetry; no handoff
    /// out of the output group exists, so this stays zero.
    #[inline]
    pub fn output_flushes(&self) -> u64 {
        self.output_flushes.load(Ordering::Relaxed)
    }

    /// Current execution mode.
    #[inline]
    pub fn mode(&self) -> ExecutionMode {
        ExecutionMode::from_raw(self.mode.load(Ordering::Acquire))
    }

    pub(crate) fn set_mode(&self, mode: ExecutionMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle for controlling a pipeline from other threads.
#[derive(Debug, Clone)]
pub struct PipelineControl {
    state: Arc<PipelineState>,
}

impl PipelineControl {
    /// Requests cooperative termination: workers observe the mode at the
    /// top of each iteration and return, the supervisor joins them.
    pub fn stop(&self) {
        self.state.set_mode(ExecutionMode::Stopped);
    }

    /// Idles the workers without tearing anything down.
    pub fn pause(&self) {
        self.state.set_mode(ExecutionMode::Paused);
    }

    /// Resumes a paused pipeline. Has no effect on one that already
    /// stopped: its workers have returned.
    pub fn resume(&self) {
        self.state.set_mode(ExecutionMode::Executing);
    }

    /// Current execution mode.
    pub fn mode(&self) -> ExecutionMode {
        self.state.mode()
    }

    /// Snapshot of the generator-flush counter.
    pub fn generator_flushes(&self) -> u64 {
        self.state.generator_flushes()
    }

    /// Snapshot of the processing-flush counter.
    pub fn processing_flushes(&self) -> u64 {
        self.state.processing_flushes()
    }

    /// Snapshot of the output-flush counter.
    pub fn output_flushes(&self) -> u64 {
        self.state.output_flushes()
    }
}

/// A stage plus the supervisor-owned flag that pauses it across flushes.
struct StageSlot {
    stage: Box<dyn Stage>,
    flushing: AtomicBool,
}

impl StageSlot {
    fn new(stage: Box<dyn Stage>) -> Self {
        Self {
            stage,
            flushing: AtomicBool::new(false),
        }
    }
}

/// The three-group pipeline: generator → processing → output.
///
/// Owns its stages and ring buffers exclusively; workers receive
/// non-owning references for the duration of `run`.
pub struct Pipeline {
    state: Arc<PipelineState>,
    generator_stages: Vec<StageSlot>,
    processing_stages: Vec<StageSlot>,
    output_stages: Vec<StageSlot>,
    generator_buffers: Vec<RingBuffer>,
    processing_buffers: Vec<RingBuffer>,
    output_buffers: Vec<RingBuffer>,
}

impl Pipeline {
    /// Builds a pipeline from three ordered stage lists and three ordered
    /// buffer groups.
    ///
    /// Fails with [`PipelineError::EmptyOutput`] if no output stage is
    /// given.
    ///
    /// # Panics
    ///
    /// Construction asserts the structural invariants that stage and
    /// buffer lists must satisfy: every buffer group is non-empty and has
    /// a uniform block count, every stage declares at least one worker and
    /// in/out buffer indices inside its group, and each group's tail
    /// buffer fits into the next group's head buffer. Violations are
    /// configuration bugs, not runtime conditions.
    pub fn new(
        generator_stages: Vec<Box<dyn Stage>>,
        processing_stages: Vec<Box<dyn Stage>>,
        output_stages: Vec<Box<dyn Stage>>,
        generator_buffers: Vec<RingBuffer>,
        processing_buffers: Vec<RingBuffer>,
        output_buffers: Vec<RingBuffer>,
    ) -> Result<Self, PipelineError> {
        if output_stages.is_empty() {
            return Err(PipelineError::EmptyOutput);
        }

        validate_group("generator", &generator_stages, &generator_buffers);
        validate_group("processing", &processing_stages, &processing_buffers);
        validate_group("output", &output_stages, &output_buffers);
        assert_handoff_fits("generator", &generator_buffers, "processing", &processing_buffers);
        assert_handoff_fits("processing", &processing_buffers, "output", &output_buffers);

        Ok(Self {
            state: Arc::new(PipelineState::new()),
            generator_stages: generator_stages.into_iter().map(StageSlot::new).collect(),
            processing_stages: processing_stages.into_iter().map(StageSlot::new).collect(),
            output_stages: output_stages.into_iter().map(StageSlot::new).collect(),
            generator_buffers,
            processing_buffers,
            output_buffers,
        })
    }

    /// A cloneable control handle for this pipeline.
    pub fn control(&self) -> PipelineControl {
        PipelineControl {
            state: Arc::clone(&self.state),
        }
    }

    /// The generator group's buffers.
    pub fn generator_buffers(&self) -> &[RingBuffer] {
        &self.generator_buffers
    }

    /// The processing group's buffers.
    pub fn processing_buffers(&self) -> &[RingBuffer] {
        &self.processing_buffers
    }

    /// The output group's buffers.
    pub fn output_buffers(&self) -> &[RingBuffer] {
        &self.output_buffers
    }

    /// Mutable access to the generator group's buffers. Available only
    /// while no worker holds the pipeline, i.e. before `run` or after it
    /// returned.
    pub fn generator_buffers_mut(&mut self) -> &mut [RingBuffer] {
        &mut self.generator_buffers
    }

    /// Mutable access to the processing group's buffers.
    pub fn processing_buffers_mut(&mut self) -> &mut [RingBuffer] {
        &mut self.processing_buffers
    }

    /// Mutable access to the output group's buffers.
    pub fn output_buffers_mut(&mut self) -> &mut [RingBuffer] {
        &mut self.output_buffers
    }

    /// Runs the pipeline on the calling thread until the execution mode
    /// becomes [`ExecutionMode::Stopped`].
    ///
    /// Initializes every stage, spawns the declared worker threads, and
    /// enters the supervisor loop. On return every worker has rejoined
    /// and every stage's `cleanup` has run.
    pub fn run(&mut self) -> Result<(), PipelineError> {
        self.state.set_mode(ExecutionMode::Executing);

        if let Err(err) = self.init_stages() {
            self.state.set_mode(ExecutionMode::Stopped);
            self.cleanup_stages();
            return Err(err.into());
        }

        // Absolute block numbers advance by the generator tail's capacity
        // per generator flush.
        let epoch_blocks = self
            .generator_buffers
            .last()
            .map_or(0, |b| b.block_count()) as u64;

        let this = &*self;
        let worker_total: usize = [
            &this.generator_stages,
            &this.processing_stages,
            &this.output_stages,
        ]
        .iter()
        .flat_map(|slots| slots.iter().map(|s| s.stage.thread_count()))
        .sum();
        info!(workers = worker_total, "pipeline running");

        std::thread::scope(|scope| {
            for (slots, buffers) in [
                (&this.generator_stages, &this.generator_buffers),
                (&this.processing_stages, &this.processing_buffers),
                (&this.output_stages, &this.output_buffers),
            ] {
                for slot in slots {
                    let from = &buffers[slot.stage.in_buffer_index()];
                    let to = &buffers[slot.stage.out_buffer_index()];
                    for _ in 0..slot.stage.thread_count() {
                        scope.spawn(move || {
                            worker::run_worker(WorkerContext {
                                stage: slot.stage.as_ref(),
                                flushing: &slot.flushing,
                                state: this.state.as_ref(),
                                from,
                                to,
                                epoch_blocks,
                            })
                        });
                    }
                }
            }
            this.supervise();
            // Scope exit joins every worker before `run` can return.
        });

        self.cleanup_stages();
        info!(
            generator_flushes = self.state.generator_flushes(),
            processing_flushes = self.state.processing_flushes(),
            "pipeline stopped"
        );
        Ok(())
    }

    /// Runs the pipeline on its own thread and returns immediately.
    ///
    /// The returned handle controls the pipeline and can `join` it to get
    /// the pipeline back for inspection. Dropping the handle detaches the
    /// supervisor thread.
    ///
    /// The controls address a *running* pipeline: a `stop` issued before
    /// the supervisor thread has entered its loop is superseded by
    /// startup. Wait for observable progress (a mode or counter change)
    /// before stopping a pipeline that was just launched.
    pub fn run_async(self) -> PipelineHandle {
        let control = self.control();
        let join = std::thread::spawn(move || {
            let mut pipeline = self;
            pipeline.run().map(|()| pipeline)
        });
        PipelineHandle { control, join }
    }

    fn init_stages(&mut self) -> Result<(), StageError> {
        for slot in &self.generator_stages {
            slot.stage.init(&mut self.generator_buffers)?;
        }
        for slot in &self.processing_stages {
            slot.stage.init(&mut self.processing_buffers)?;
        }
        for slot in &self.output_stages {
            slot.stage.init(&mut self.output_buffers)?;
        }
        Ok(())
    }

    fn cleanup_stages(&self) {
        for slot in self
            .generator_stages
            .iter()
            .chain(&self.processing_stages)
            .chain(&self.output_stages)
        {
            slot.stage.cleanup();
        }
    }

    fn supervise(&self) {
        while self.state.mode() != ExecutionMode::Stopped {
            self.try_flush(
                &self.generator_stages,
                &self.processing_stages,
                &self.generator_buffers,
                &self.processing_buffers,
                &self.state.generator_flushes,
                "generator",
            );
            self.try_flush(
                &self.processing_stages,
                &self.output_stages,
                &self.processing_buffers,
                &self.output_buffers,
                &self.state.processing_flushes,
                "processing",
            );
            std::thread::yield_now();
        }
    }

    /// Performs one group handoff if its flush condition holds: the source
    /// tail entirely `PROCESSED` and both destination endpoints entirely
    /// `DEFAULT`.
    fn try_flush(
        &self,
        src_stages: &[StageSlot],
        dst_stages: &[StageSlot],
        src_buffers: &[RingBuffer],
        dst_buffers: &[RingBuffer],
        counter: &AtomicU64,
        group: &str,
    ) {
        let (Some(src_tail), Some(src_head)) = (src_buffers.last(), src_buffers.first()) else {
            return;
        };
        let (Some(dst_head), Some(dst_tail)) = (dst_buffers.first(), dst_buffers.last()) else {
            return;
        };

        if src_tail.first_index_not_matching(STATE_PROCESSED).is_some()
            || dst_head.first_index_not_matching(STATE_DEFAULT).is_some()
            || dst_tail.first_index_not_matching(STATE_DEFAULT).is_some()
        {
            return;
        }

        // Quiesce: workers that observe the flag, or a state byte no
        // longer equal to their entry state, abandon their claim attempts.
        for slot in src_stages.iter().chain(dst_stages) {
            slot.flushing.store(true, Ordering::Release);
        }
        fence(Ordering::Acquire);

        counter.fetch_add(1, Ordering::Relaxed);
        // SAFETY: the flush precondition proves the touched buffers hold
        // no claims (entirely PROCESSED or entirely DEFAULT), and the
        // raised flags keep new claims out until the release fence below.
        unsafe {
            if let Err(err) = src_tail.copy_to(dst_head, 0) {
                // Unreachable with construction-validated sizes.
                error!(group, %err, "flush copy failed");
            }
            src_head.clear_shared();
        }
        if let Some(first) = dst_stages.first() {
            dst_head.fill_states(first.stage.entry_state());
        }
        src_tail.fill_states(STATE_DEFAULT);

        fence(Ordering::Release);
        for slot in src_stages.iter().chain(dst_stages) {
            slot.flushing.store(false, Ordering::Release);
        }
        debug!(
            group,
            count = counter.load(Ordering::Relaxed),
            "group flush"
        );
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("generator_stages", &self.generator_stages.len())
            .field("processing_stages", &self.processing_stages.len())
            .field("output_stages", &self.output_stages.len())
            .field("mode", &self.state.mode())
            .finish_non_exhaustive()
    }
}

/// Handle to a pipeline running on its own thread.
#[derive(Debug)]
pub struct PipelineHandle {
    control: PipelineControl,
    join: JoinHandle<Result<Pipeline, PipelineError>>,
}

impl PipelineHandle {
    /// A cloneable control handle for the running pipeline.
    pub fn control(&self) -> PipelineControl {
        self.control.clone()
    }

    /// Requests cooperative termination.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Idles the workers.
    pub fn pause(&self) {
        self.control.pause();
    }

    /// Resumes a paused pipeline.
    pub fn resume(&self) {
        self.control.resume();
    }

    /// Waits for the supervisor thread to finish and returns the pipeline
    /// for post-run inspection. Call [`stop`](Self::stop) first, or this
    /// blocks until something else stops the pipeline.
    pub fn join(self) -> Result<Pipeline, PipelineError> {
        match self.join.join() {
            Ok(result) => result,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}

fn validate_group(group: &str, stages: &[Box<dyn Stage>], buffers: &[RingBuffer]) {
    assert!(
        !buffers.is_empty(),
        "{group} group needs at least one ring buffer"
    );
    let block_count = buffers[0].block_count();
    assert!(
        buffers.iter().all(|b| b.block_count() == block_count),
        "{group} group buffers must share one block count"
    );
    for (i, stage) in stages.iter().enumerate() {
        assert!(
            stage.thread_count() >= 1,
            "{group} stage {i} declares zero workers"
        );
        assert!(
            stage.in_buffer_index() < buffers.len() && stage.out_buffer_index() < buffers.len(),
            "{group} stage {i} references a buffer outside its group"
        );
    }
}

fn assert_handoff_fits(
    src_group: &str,
    src_buffers: &[RingBuffer],
    dst_group: &str,
    dst_buffers: &[RingBuffer],
) {
    let src_tail = src_buffers.last().map_or(0, |b| b.block_count());
    let dst_head = dst_buffers.first().map_or(0, |b| b.block_count());
    assert!(
        src_tail <= dst_head,
        "{src_group} tail ({src_tail} blocks) does not fit the {dst_group} head ({dst_head} blocks)"
    );
}
