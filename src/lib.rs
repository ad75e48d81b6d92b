pub mod error;
pub mod image;
pub mod logging;
pub mod pipeline;
pub mod stats;
pub mod utils;

use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use error::PipelineError;
pub use image::{FrameSnapshot, Image, ImageFormat, ImageMetadata, PixelFormat};
pub use pipeline::{
    BufferConfig, Consumer, ConsumerCore, ConsumerId, CycleGuard, ImageMultiplexer,
    MultiplexerConfig, OverflowPolicy, Producer, ProducerCore, ReadGuard, SharedImageBuffer,
    StreamReader, TestPatternProducer, WriteGuard,
};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
///
/// Seeds the demo pipeline. Buffer capacity, overflow policy, and the stall
/// timeout remain constructor-time parameters on the components themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub buffer_slots: usize,
    pub overflow: OverflowPolicy,
    pub stall_timeout_ms: u64,
    pub idle_wait_us: u64,
}

impl PipelineConfig {
    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            capacity: self.buffer_slots,
            policy: self.overflow,
        }
    }

    pub fn multiplexer_config(&self) -> MultiplexerConfig {
        MultiplexerConfig {
            buffer: self.buffer_config(),
            stall_timeout: Duration::from_millis(self.stall_timeout_ms),
            idle_wait: Duration::from_micros(self.idle_wait_us),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                width: 320,
                height: 240,
                fps: 30,
                format: PixelFormat::Gray8,
            },
            pipeline: PipelineConfig {
                buffer_slots: 8,
                overflow: OverflowPolicy::Block,
                stall_timeout_ms: 500,
                idle_wait_us: 1000,
            },
        }
    }
}

impl SourceConfig {
    pub fn image_format(&self) -> ImageFormat {
        ImageFormat::new(self.width, self.height, self.format)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}
