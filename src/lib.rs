// Library exports for the chat-bubble translation workflow

// Core modules
pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::Config,
    errors::{ConfigError, FetchError, OcrError, PipelineError, RenderingError, TranslationError},
    types::{Bubble, PipelineReport, Rect, TextBlock, TranslationOutcome},
};

pub use middleware::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use orchestration::BubbleTranslator;

pub use services::{
    BubbleSegmenter, CosmicTextRenderer, OcrEngine, RegionExtractor, TesseractOcr,
    TextLayoutEngine, TranslationChain, Translator,
};

pub use utils::{decode_image, encode_png, Metrics};
