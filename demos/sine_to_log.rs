//! The reference chain: a 1 kHz sine, doubled, printed to stdout.
//!
//! Run with `cargo run --example sine_to_log`.

use sluice::block::STATE_PROCESSED;
use sluice::pipeline::Pipeline;
use sluice::ring::RingBuffer;
use sluice::stage::Stage;
use sluice::stages::{GainStage, LoggerStage, SineGenerator};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let pipeline = Pipeline::new(
        vec![Box::new(SineGenerator::new(1000.0)) as Box<dyn Stage>],
        vec![Box::new(GainStage::new(2.0, 0x01, STATE_PROCESSED)) as Box<dyn Stage>],
        vec![Box::new(LoggerStage::stdout(0x03)) as Box<dyn Stage>],
        vec![RingBuffer::new(96)?],
        vec![RingBuffer::new(96)?],
        vec![RingBuffer::new(96)?],
    )?;

    let handle = pipeline.run_async();
    std::thread::sleep(Duration::from_millis(100));
    handle.stop();
    handle.join()?;
    Ok(())
}
