pub mod format;
pub mod frame;

pub use format::ImageFormat;
pub use format::PixelFormat;
pub use frame::FrameSnapshot;
pub use frame::Image;
pub use frame::ImageMetadata;
