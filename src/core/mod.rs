pub mod config;
pub mod errors;
pub mod language;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    ConfigError, FetchError, OcrError, PipelineError, RenderingError, TranslationError,
};
pub use language::{find_language, language_name, Language, LANGUAGES};
pub use types::{
    Bubble, OcrLine, OcrOutput, PipelineReport, Rect, Segmentation, TextBlock,
    TranslationOutcome,
};
