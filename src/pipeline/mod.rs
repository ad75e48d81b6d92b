pub mod buffer;
pub mod consumer;
pub mod multiplexer;
pub mod pattern;
pub mod producer;

pub use buffer::BufferConfig;
pub use buffer::ConsumerId;
pub use buffer::OverflowPolicy;
pub use buffer::ReadGuard;
pub use buffer::SharedImageBuffer;
pub use buffer::WriteGuard;
pub use consumer::Consumer;
pub use consumer::ConsumerCore;
pub use consumer::StreamReader;
pub use multiplexer::ImageMultiplexer;
pub use multiplexer::MultiplexerConfig;
pub use pattern::TestPatternProducer;
pub use producer::CycleGuard;
pub use producer::Producer;
pub use producer::ProducerCore;
