//! Frame container exchanged through the pipeline

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::error::PipelineError;
use crate::image::format::ImageFormat;

/// Per-frame metadata side-channel.
///
/// The multiplexer relabels `source` when it republishes a frame; everything
/// else is stamped once by the producer that created the frame.
#[derive(Debug, Clone)]
pub struct ImageMetadata {
    /// Identity of the stage that produced (or relabeled) this frame.
    pub source: Option<String>,
    /// Strictly increasing per producer trigger cycle.
    pub sequence: u64,
    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
    /// Hardware timestamp if the backend provides one.
    pub device_timestamp: Option<Duration>,
}

impl ImageMetadata {
    pub fn new(sequence: u64) -> Self {
        Self {
            source: None,
            sequence,
            timestamp: Instant::now(),
            device_timestamp: None,
        }
    }
}

/// One frame: an owned pixel buffer sized to its format plus optional
/// metadata.
///
/// Images live inside buffer slots and are reused in place for the life of
/// the buffer; the payload is allocated lazily the first time the slot is
/// written. Consumers get a read-only view for the duration of a processing
/// call and must [`Image::snapshot`] to retain anything beyond it.
pub struct Image {
    data: BytesMut,
    format: ImageFormat,
    metadata: Option<ImageMetadata>,
}

impl Image {
    /// Create an image shell for `format` without allocating the payload.
    pub fn new(format: ImageFormat) -> Self {
        Self {
            data: BytesMut::new(),
            format,
            metadata: None,
        }
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn metadata(&self) -> Option<&ImageMetadata> {
        self.metadata.as_ref()
    }

    pub fn set_metadata(&mut self, metadata: ImageMetadata) {
        self.metadata = Some(metadata);
    }

    /// Mutable payload access for the writing producer. Allocates on first
    /// use, zero-filled.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.ensure_allocated();
        &mut self.data
    }

    pub(crate) fn ensure_allocated(&mut self) {
        let len = self.format.bytes_per_image();
        if self.data.len() != len {
            self.data.resize(len, 0);
        }
    }

    /// Copy another image's payload and metadata into this slot.
    ///
    /// Fails with `FormatMismatch` instead of reinterpreting bytes when the
    /// formats disagree. A source that was never written has no payload to
    /// copy; only its metadata is taken.
    pub fn fill_from(&mut self, src: &Image) -> Result<(), PipelineError> {
        if src.format != self.format {
            return Err(PipelineError::FormatMismatch {
                expected: self.format,
                actual: src.format,
            });
        }
        self.ensure_allocated();
        if !src.data.is_empty() {
            self.data.copy_from_slice(src.data());
        }
        self.metadata = src.metadata.clone();
        Ok(())
    }

    /// Explicit clone for consumers that need to retain a frame beyond the
    /// processing call.
    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            data: Bytes::copy_from_slice(&self.data),
            format: self.format,
            metadata: self.metadata.clone(),
        }
    }
}

/// Immutable, owned copy of a frame with zero-copy clone semantics.
#[derive(Clone)]
pub struct FrameSnapshot {
    pub data: Bytes,
    pub format: ImageFormat,
    pub metadata: Option<ImageMetadata>,
}
