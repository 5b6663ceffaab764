// Error types for the bubble translation pipeline
//
// Only decoding (and encode / task failures) escape the pipeline. OCR,
// translation and rendering errors are scoped to one bubble or one batch and
// degrade locally, but they still carry typed context for logging.

use thiserror::Error;

/// Pipeline errors surfaced to the caller of `translate_bubbles`
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Input is not a readable image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode output image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Image has zero size ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("Blocking task failed during {stage}: {message}")]
    TaskJoinFailed { stage: &'static str, message: String },
}

/// OCR collaborator errors (scoped to one bubble)
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Failed to launch OCR engine '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OCR engine exited with status {status}: {stderr}")]
    EngineFailed { status: i32, stderr: String },

    #[error("OCR timed out after {0}ms")]
    Timeout(u64),

    #[error("Crop preprocessing failed: {0}")]
    Preprocess(#[from] image::ImageError),

    #[error("Unparseable OCR output: {0}")]
    InvalidOutput(String),
}

/// Translation collaborator errors (scoped to the whole batch)
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Translation provider '{0}' is not configured")]
    NotConfigured(&'static str),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Response length {actual} does not match request length {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Translation timed out after {0}ms")]
    Timeout(u64),
}

/// Rendering errors
#[derive(Debug, Error)]
pub enum RenderingError {
    #[error("Font loading failed: {0}")]
    FontLoad(String),
}

/// Image fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Server returned status {0}")]
    Status(u16),

    #[error("Content type '{0}' is not an image")]
    NotAnImage(String),

    #[error("Fetch timed out after {0}ms")]
    Timeout(u64),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Downscale factor must be in (0.0, 1.0], got {0}")]
    InvalidScale(f32),

    #[error("Invalid segmentation config: {0}")]
    InvalidSegmentationConfig(String),

    #[error("Invalid extraction config: {0}")]
    InvalidExtractionConfig(String),

    #[error("Invalid OCR config: {0}")]
    InvalidOcrConfig(String),

    #[error("Invalid translation config: {0}")]
    InvalidTranslationConfig(String),

    #[error("Invalid layout config: {0}")]
    InvalidLayoutConfig(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
pub type OcrResult<T> = Result<T, OcrError>;
pub type TranslationResult<T> = Result<T, TranslationError>;
pub type RenderingResult<T> = Result<T, RenderingError>;
pub type FetchResult<T> = Result<T, FetchError>;

impl PipelineError {
    /// Wrap a `spawn_blocking` join failure with the stage it happened in
    pub fn join(stage: &'static str, err: tokio::task::JoinError) -> Self {
        PipelineError::TaskJoinFailed {
            stage,
            message: err.to_string(),
        }
    }
}
