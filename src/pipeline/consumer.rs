//! Consumer side of the frame exchange

use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineError;
use crate::image::ImageFormat;
use crate::pipeline::buffer::{ConsumerId, ReadGuard, SharedImageBuffer};
use crate::pipeline::producer::Producer;

/// One registered read cursor into one producer stream.
///
/// The cursor is owned here but consulted by the shared buffer; it is
/// removed from the buffer when the reader drops, so a departed consumer
/// can never stall the writer. The per-call contract is synchronous;
/// deployments loop [`StreamReader::fetch`] on a dedicated thread and park
/// in [`StreamReader::wait`] when drained.
///
/// A stream's format is fixed at buffer construction, so the format
/// contract is enforced once, at attach time.
pub struct StreamReader {
    buffer: Arc<SharedImageBuffer>,
    id: ConsumerId,
    format: ImageFormat,
}

impl StreamReader {
    /// Register a cursor on `stream` of `producer`, accepting whatever
    /// format the stream carries.
    pub fn attach(producer: &dyn Producer, stream: usize) -> Self {
        let buffer = Arc::clone(producer.buffer(stream));
        let format = buffer.format();
        let id = buffer.register_consumer();
        Self { buffer, id, format }
    }

    /// Register a cursor for a stage configured for a specific format.
    /// Fails with `FormatMismatch` when the stream carries something else;
    /// the stage never gets a cursor it would misread.
    pub fn attach_expecting(
        producer: &dyn Producer,
        stream: usize,
        expected: ImageFormat,
    ) -> Result<Self, PipelineError> {
        let actual = producer.format(stream);
        if actual != expected {
            return Err(PipelineError::FormatMismatch { expected, actual });
        }
        Ok(Self::attach(producer, stream))
    }

    /// Next unseen frame, or `NoNewFrame` when caught up. Never blocks.
    pub fn fetch(&mut self) -> Result<ReadGuard<'_>, PipelineError> {
        self.buffer.reserve_read(self.id)
    }

    /// Park until a frame is ready or the timeout elapses.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.buffer.wait_for_frame(self.id, timeout)
    }

    pub fn available(&self) -> usize {
        self.buffer.available(self.id)
    }

    pub fn dropped(&self) -> u64 {
        self.buffer.dropped(self.id)
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.buffer.unregister_consumer(self.id);
    }
}

/// Capability interface for stages that read one or more producer streams.
pub trait Consumer {
    fn streams(&self) -> usize;

    fn get_frame(&mut self, stream: usize) -> Result<ReadGuard<'_>, PipelineError>;
}

/// Cursor bookkeeping for multi-stream consumers, composed by concrete
/// stages.
#[derive(Default)]
pub struct ConsumerCore {
    readers: Vec<StreamReader>,
}

impl ConsumerCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to one producer stream; returns the local stream index.
    pub fn attach_stream(&mut self, producer: &dyn Producer, stream: usize) -> usize {
        self.readers.push(StreamReader::attach(producer, stream));
        self.readers.len() - 1
    }

    pub fn reader(&self, stream: usize) -> &StreamReader {
        &self.readers[stream]
    }

    pub fn reader_mut(&mut self, stream: usize) -> &mut StreamReader {
        &mut self.readers[stream]
    }
}

impl Consumer for ConsumerCore {
    fn streams(&self) -> usize {
        self.readers.len()
    }

    fn get_frame(&mut self, stream: usize) -> Result<ReadGuard<'_>, PipelineError> {
        self.readers[stream].fetch()
    }
}
