pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use image_ops::{
    crop_bubble,
    decode_image,
    decode_image_async,
    encode_png,
    encode_png_async,
};
pub use metrics::{Metrics, MetricsSnapshot, Stage};
