//! Producer side of the frame exchange

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::PipelineError;
use crate::image::{Image, ImageFormat, ImageMetadata};
use crate::pipeline::buffer::{BufferConfig, SharedImageBuffer, WriteGuard};

/// Capability interface for anything that publishes frame streams.
///
/// Concrete stages compose a [`ProducerCore`] instead of inheriting; the
/// trait is what consumers attach to.
pub trait Producer {
    fn streams(&self) -> usize;

    fn format(&self, stream: usize) -> ImageFormat;

    fn buffer(&self, stream: usize) -> &Arc<SharedImageBuffer>;
}

/// Owns one shared buffer per distinct output stream and sequences whole
/// trigger cycles into them.
pub struct ProducerCore {
    buffers: Vec<Arc<SharedImageBuffer>>,
    sequence: AtomicU64,
}

impl ProducerCore {
    /// One buffer per format, all with the same capacity and policy.
    pub fn new(formats: &[ImageFormat], config: BufferConfig) -> Self {
        assert!(!formats.is_empty(), "a producer needs at least one stream");
        Self {
            buffers: formats
                .iter()
                .map(|f| Arc::new(SharedImageBuffer::new(*f, config)))
                .collect(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn streams(&self) -> usize {
        self.buffers.len()
    }

    pub fn format(&self, stream: usize) -> ImageFormat {
        self.buffers[stream].format()
    }

    pub fn buffer(&self, stream: usize) -> &Arc<SharedImageBuffer> {
        &self.buffers[stream]
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Least number of readable frames across every stream's consumers.
    pub fn least_available(&self) -> usize {
        self.buffers
            .iter()
            .map(|b| b.least_available())
            .min()
            .unwrap_or(0)
    }

    /// Reserve a write slot on every stream for one trigger cycle.
    ///
    /// All reservations are taken before any frame becomes visible;
    /// dropping the returned guard commits every stream together, so a
    /// consumer reading streams A and B at the same index sees frames
    /// captured in the same cycle. On failure nothing is published.
    pub fn begin_cycle(&self) -> Result<CycleGuard<'_>, PipelineError> {
        self.reserve_cycle(SharedImageBuffer::reserve_write)
    }

    /// Non-blocking cycle start; `BufferFull` when any stream is full.
    pub fn try_begin_cycle(&self) -> Result<CycleGuard<'_>, PipelineError> {
        self.reserve_cycle(SharedImageBuffer::try_reserve_write)
    }

    fn reserve_cycle<'a>(
        &'a self,
        reserve: impl Fn(&'a SharedImageBuffer) -> Result<WriteGuard<'a>, PipelineError>,
    ) -> Result<CycleGuard<'a>, PipelineError> {
        let mut slots = Vec::with_capacity(self.buffers.len());
        for buf in &self.buffers {
            match reserve(buf.as_ref()) {
                Ok(guard) => slots.push(guard),
                Err(e) => {
                    for guard in slots {
                        guard.cancel();
                    }
                    return Err(e);
                }
            }
        }
        Ok(CycleGuard {
            slots,
            sequence: self.next_sequence(),
        })
    }

    /// Stop every stream's buffer, waking any blocked writer or parked
    /// consumer.
    pub fn stop(&self) {
        for buf in &self.buffers {
            buf.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.buffers.iter().all(|b| b.is_stopped())
    }
}

impl Producer for ProducerCore {
    fn streams(&self) -> usize {
        ProducerCore::streams(self)
    }

    fn format(&self, stream: usize) -> ImageFormat {
        ProducerCore::format(self, stream)
    }

    fn buffer(&self, stream: usize) -> &Arc<SharedImageBuffer> {
        ProducerCore::buffer(self, stream)
    }
}

/// One reserved trigger cycle across all streams of a producer. Commits on
/// drop; [`CycleGuard::cancel`] abandons the cycle without publishing.
pub struct CycleGuard<'a> {
    slots: Vec<WriteGuard<'a>>,
    sequence: u64,
}

impl<'a> CycleGuard<'a> {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn streams(&self) -> usize {
        self.slots.len()
    }

    pub fn image_mut(&mut self, stream: usize) -> &mut Image {
        &mut self.slots[stream]
    }

    /// Stamp every stream of the cycle with shared metadata carrying this
    /// cycle's sequence number.
    pub fn stamp(&mut self, source: Option<&str>) {
        let mut meta = ImageMetadata::new(self.sequence);
        meta.source = source.map(str::to_string);
        for slot in &mut self.slots {
            slot.set_metadata(meta.clone());
        }
    }

    /// Commit the cycle now instead of at end of scope.
    pub fn commit(self) {}

    pub fn cancel(self) {
        for guard in self.slots {
            guard.cancel();
        }
    }
}
