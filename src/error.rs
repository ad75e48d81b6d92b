//! Pipeline error taxonomy

use thiserror::Error;

use crate::image::ImageFormat;

/// Errors surfaced by the frame-exchange core.
///
/// `BufferFull` and `NoNewFrame` are control-flow signals that callers are
/// expected to handle every cycle; `FormatMismatch` is fatal to the stage
/// that hits it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The next write slot has not been released by all consumers.
    #[error("buffer full: slowest consumer has not released the next slot")]
    BufferFull,

    /// The consumer has caught up with the writer.
    #[error("no new frame available")]
    NoNewFrame,

    /// A stage received a frame whose format differs from what it was
    /// configured for. Continuing would silently reinterpret bytes.
    #[error("format mismatch: expected {expected:?}, got {actual:?}")]
    FormatMismatch {
        expected: ImageFormat,
        actual: ImageFormat,
    },

    /// An upstream source of a multiplexer has not produced within its
    /// stall timeout. Logged and skipped, never fatal to the multiplexer.
    /// The field is not named `source` so thiserror does not treat it as
    /// an error chain.
    #[error("upstream {upstream} stalled")]
    UpstreamStall { upstream: String },

    /// The buffer was stopped while a writer was blocked on it.
    #[error("pipeline stopped")]
    Stopped,
}
