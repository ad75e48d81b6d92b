//! Synthetic test-pattern producer
//!
//! A triggered producer generating a moving byte gradient. Used by the demo
//! binary and the integration tests; it exercises the full producer
//! contract without any capture backend.

use std::sync::Arc;

use crate::error::PipelineError;
use crate::image::ImageFormat;
use crate::pipeline::buffer::{BufferConfig, SharedImageBuffer};
use crate::pipeline::producer::{Producer, ProducerCore};

pub struct TestPatternProducer {
    core: ProducerCore,
    name: String,
}

impl TestPatternProducer {
    /// `streams` identical-format output streams, e.g. raw + processed.
    pub fn new(format: ImageFormat, streams: usize, config: BufferConfig, name: &str) -> Self {
        let formats = vec![format; streams];
        Self {
            core: ProducerCore::new(&formats, config),
            name: name.to_string(),
        }
    }

    /// Produce one frame per stream for a single logical timestep. Blocks
    /// or drops per the buffers' overflow policy.
    pub fn trigger(&self) -> Result<(), PipelineError> {
        let mut cycle = self.core.begin_cycle()?;
        let seq = cycle.sequence();
        for stream in 0..cycle.streams() {
            fill_gradient(cycle.image_mut(stream).data_mut(), seq);
        }
        cycle.stamp(Some(&self.name));
        Ok(())
    }

    /// Non-blocking trigger; `BufferFull` when any stream is backed up.
    pub fn try_trigger(&self) -> Result<(), PipelineError> {
        let mut cycle = self.core.try_begin_cycle()?;
        let seq = cycle.sequence();
        for stream in 0..cycle.streams() {
            fill_gradient(cycle.image_mut(stream).data_mut(), seq);
        }
        cycle.stamp(Some(&self.name));
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop(&self) {
        self.core.stop();
    }
}

impl Producer for TestPatternProducer {
    fn streams(&self) -> usize {
        self.core.streams()
    }

    fn format(&self, stream: usize) -> ImageFormat {
        self.core.format(stream)
    }

    fn buffer(&self, stream: usize) -> &Arc<SharedImageBuffer> {
        self.core.buffer(stream)
    }
}

fn fill_gradient(data: &mut [u8], seq: u64) {
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i as u64).wrapping_add(seq) as u8;
    }
}
