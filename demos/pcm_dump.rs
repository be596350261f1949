//! Dumps a gain-adjusted sine to a raw little-endian f32 PCM file.
//!
//! Run with `cargo run --example pcm_dump -- [path]`.

use sluice::block::STATE_PROCESSED;
use sluice::pipeline::Pipeline;
use sluice::ring::RingBuffer;
use sluice::stage::Stage;
use sluice::stages::{GainStage, PcmWriterStage, SineGenerator};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "pcm_dump.raw".to_string());

    let pipeline = Pipeline::new(
        vec![Box::new(SineGenerator::new(440.0)) as Box<dyn Stage>],
        vec![Box::new(GainStage::new(0.8, 0x01, STATE_PROCESSED)) as Box<dyn Stage>],
        vec![Box::new(PcmWriterStage::new(&path, 0x03)) as Box<dyn Stage>],
        vec![RingBuffer::new(96)?],
        vec![RingBuffer::new(96)?],
        vec![RingBuffer::new(96)?],
    )?;

    let handle = pipeline.run_async();
    std::thread::sleep(Duration::from_millis(200));
    handle.stop();
    handle.join()?;

    let bytes = std::fs::metadata(&path)?.len();
    println!("wrote {bytes} bytes of f32 PCM to {path}");
    Ok(())
}
